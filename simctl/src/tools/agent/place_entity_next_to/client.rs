use crate::capability::{args, Capability, Direction, ToolContext};
use crate::error::{ControlError, ControlResult};
use lua_codec::Value;
use std::sync::Arc;

/// Places an entity beside a reference position, `spacing` tiles away in
/// `direction`.
pub struct PlaceNextTo {
    ctx: ToolContext,
}

pub fn build(ctx: ToolContext) -> ControlResult<Arc<dyn Capability>> {
    Ok(Arc::new(PlaceNextTo { ctx }))
}

impl Capability for PlaceNextTo {
    fn name(&self) -> &str {
        self.ctx.capability()
    }

    fn call(&self, a: &[Value]) -> ControlResult<Value> {
        let cap = self.name();
        args::arity(cap, a, 4, 5)?;
        let entity = args::string(cap, a, 0, "entity name")?;
        let ref_x = args::number(cap, a, 1, "reference x")?;
        let ref_y = args::number(cap, a, 2, "reference y")?;
        let direction = Direction::from_value(&a[3])
            .map_err(|m| ControlError::invalid_argument(cap, m))?;
        let spacing = match a.get(4) {
            None | Some(Value::Nil) => 0,
            Some(_) => args::count(cap, a, 4, "spacing")?,
        };
        if matches!(
            direction,
            Direction::NorthEast | Direction::SouthEast | Direction::SouthWest | Direction::NorthWest
        ) {
            return Err(ControlError::invalid_argument(
                cap,
                "direction must be north, east, south or west",
            ));
        }
        self.ctx.invoke(&[
            Value::from(entity),
            Value::Number(ref_x),
            Value::Number(ref_y),
            Value::from(direction as i64),
            Value::from(spacing),
        ])
    }
}
