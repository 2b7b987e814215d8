//! Moves the agent's character to the nearest free spot around a position.

use crate::capability::{args, Capability, ToolContext};
use crate::error::ControlResult;
use lua_codec::Value;
use std::sync::Arc;

pub struct MoveTo {
    ctx: ToolContext,
}

pub fn build(ctx: ToolContext) -> ControlResult<Arc<dyn Capability>> {
    Ok(Arc::new(MoveTo { ctx }))
}

impl Capability for MoveTo {
    fn name(&self) -> &str {
        self.ctx.capability()
    }

    /// `move_to(x, y)`; returns the final `{x, y}` position.
    fn call(&self, a: &[Value]) -> ControlResult<Value> {
        let name = self.name();
        args::arity(name, a, 2, 2)?;
        let x = args::number(name, a, 0, "x")?;
        let y = args::number(name, a, 1, "y")?;
        self.ctx.invoke(&[Value::Number(x), Value::Number(y)])
    }
}
