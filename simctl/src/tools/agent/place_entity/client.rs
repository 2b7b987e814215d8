//! Places an entity from the character's inventory.

use crate::capability::{args, Capability, Direction, ToolContext};
use crate::error::{ControlError, ControlResult};
use lua_codec::Value;
use std::sync::Arc;

pub struct PlaceEntity {
    ctx: ToolContext,
}

pub fn build(ctx: ToolContext) -> ControlResult<Arc<dyn Capability>> {
    Ok(Arc::new(PlaceEntity { ctx }))
}

impl Capability for PlaceEntity {
    fn name(&self) -> &str {
        self.ctx.capability()
    }

    /// `place_entity(name, x, y, direction?)`, direction defaulting to north.
    fn call(&self, a: &[Value]) -> ControlResult<Value> {
        let cap = self.name();
        args::arity(cap, a, 3, 4)?;
        let entity = args::string(cap, a, 0, "entity name")?;
        let x = args::number(cap, a, 1, "x")?;
        let y = args::number(cap, a, 2, "y")?;
        let direction = match a.get(3) {
            None | Some(Value::Nil) => Direction::North,
            Some(v) => Direction::from_value(v).map_err(|m| ControlError::invalid_argument(cap, m))?,
        };
        self.ctx.invoke(&[
            Value::from(entity),
            Value::Number(x),
            Value::Number(y),
            Value::from(direction as i64),
        ])
    }
}
