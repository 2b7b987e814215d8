use crate::capability::{args, Capability, ToolContext};
use crate::error::ControlResult;
use lua_codec::Value;
use std::sync::Arc;

/// Removes every non-character entity the agent's force owns. Returns how
/// many were destroyed.
pub struct ClearEntities {
    ctx: ToolContext,
}

pub fn build(ctx: ToolContext) -> ControlResult<Arc<dyn Capability>> {
    Ok(Arc::new(ClearEntities { ctx }))
}

impl Capability for ClearEntities {
    fn name(&self) -> &str {
        self.ctx.capability()
    }

    fn call(&self, a: &[Value]) -> ControlResult<Value> {
        args::arity(self.name(), a, 0, 0)?;
        self.ctx.invoke(&[])
    }
}
