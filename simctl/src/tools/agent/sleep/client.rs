use crate::capability::{args, Capability, ToolContext};
use crate::error::ControlResult;
use lua_codec::Value;
use std::sync::Arc;
use std::time::Duration;

const TICKS_PER_SECOND: f64 = 60.0;

/// Waits for a number of game ticks, scaled by the session's game speed.
pub struct Sleep {
    ctx: ToolContext,
}

pub fn build(ctx: ToolContext) -> ControlResult<Arc<dyn Capability>> {
    Ok(Arc::new(Sleep { ctx }))
}

impl Capability for Sleep {
    fn name(&self) -> &str {
        self.ctx.capability()
    }

    fn call(&self, a: &[Value]) -> ControlResult<Value> {
        let cap = self.name();
        args::arity(cap, a, 1, 1)?;
        let ticks = args::count(cap, a, 0, "ticks")?;
        let start_tick = self.ctx.invoke(&[])?;
        if self.ctx.core().transaction_open() {
            // The tick read was only queued, so there is nothing to wait for
            return Ok(start_tick);
        }

        let speed = self.ctx.core().clock().game_speed;
        let wall = Duration::from_secs_f64(ticks as f64 / (TICKS_PER_SECOND * speed));
        tracing::debug!("sleeping {} ticks ({:?} at speed {})", ticks, wall, speed);
        std::thread::sleep(wall);

        let end_tick = self.ctx.invoke(&[])?;
        match (start_tick.as_i64(), end_tick.as_i64()) {
            (Some(start), Some(end)) => Ok(Value::from(end - start)),
            _ => Ok(Value::from(ticks)),
        }
    }
}
