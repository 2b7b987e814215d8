use crate::capability::{args, Capability, ToolContext};
use crate::error::ControlResult;
use lua_codec::Value;
use std::sync::Arc;

/// Reads the character's main inventory as a `name -> count` map.
pub struct InspectInventory {
    ctx: ToolContext,
}

pub fn build(ctx: ToolContext) -> ControlResult<Arc<dyn Capability>> {
    Ok(Arc::new(InspectInventory { ctx }))
}

impl Capability for InspectInventory {
    fn name(&self) -> &str {
        self.ctx.capability()
    }

    fn call(&self, a: &[Value]) -> ControlResult<Value> {
        args::arity(self.name(), a, 0, 0)?;
        // An empty inventory comes back as an empty table
        match self.ctx.invoke(&[])? {
            Value::List(items) if items.is_empty() => Ok(Value::Map(Default::default())),
            other => Ok(other),
        }
    }
}
