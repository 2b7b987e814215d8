//! Replaces the character's inventory with the given `name -> count` map.

use crate::capability::{Capability, ToolContext};
use crate::error::{ControlError, ControlResult};
use lua_codec::Value;
use std::sync::Arc;

pub struct SetInventory {
    ctx: ToolContext,
}

pub fn build(ctx: ToolContext) -> ControlResult<Arc<dyn Capability>> {
    Ok(Arc::new(SetInventory { ctx }))
}

impl Capability for SetInventory {
    fn name(&self) -> &str {
        self.ctx.capability()
    }

    fn call(&self, a: &[Value]) -> ControlResult<Value> {
        let cap = self.name();
        let items = match a {
            [Value::Map(items)] => items,
            // An empty table decodes as a list
            [Value::List(items)] if items.is_empty() => return self.ctx.invoke(&[Value::List(vec![])]),
            _ => {
                return Err(ControlError::invalid_argument(
                    cap,
                    "expected one `{item = count}` map",
                ))
            }
        };
        for (item, count) in items {
            if !count.as_i64().map_or(false, |n| n >= 0) {
                return Err(ControlError::invalid_argument(
                    cap,
                    format!("count for `{}` must be a non-negative integer", item),
                ));
            }
        }
        self.ctx.invoke(a)
    }
}
