use crate::capability::{args, Capability, ToolContext};
use crate::error::ControlResult;
use lua_codec::Value;
use std::sync::Arc;

pub struct PickUpEntity {
    ctx: ToolContext,
}

pub fn build(ctx: ToolContext) -> ControlResult<Arc<dyn Capability>> {
    Ok(Arc::new(PickUpEntity { ctx }))
}

impl Capability for PickUpEntity {
    fn name(&self) -> &str {
        self.ctx.capability()
    }

    /// `pickup_entity(name, x, y)`; true once the entity is back in the
    /// inventory.
    fn call(&self, a: &[Value]) -> ControlResult<Value> {
        let cap = self.name();
        args::arity(cap, a, 3, 3)?;
        let entity = args::string(cap, a, 0, "entity name")?;
        let x = args::number(cap, a, 1, "x")?;
        let y = args::number(cap, a, 2, "y")?;
        self.ctx
            .invoke(&[Value::from(entity), Value::Number(x), Value::Number(y)])
    }
}
