//! Shipped capabilities.
//!
//! Each capability lives in `<owner>/<name>/` next to its `server.lua`; the
//! catalog below maps implementation identifiers to constructors.

use crate::capability::{Capability, ToolContext};
use crate::error::ControlResult;
use once_cell::sync::Lazy;
use std::collections::HashMap;
use std::sync::Arc;

pub mod admin;
pub mod agent;

pub type Constructor = fn(ToolContext) -> ControlResult<Arc<dyn Capability>>;

static CATALOG: Lazy<HashMap<&'static str, Constructor>> = Lazy::new(|| {
    let mut catalog: HashMap<&'static str, Constructor> = HashMap::new();
    catalog.insert("MoveTo", agent::move_to::build);
    catalog.insert("InspectInventory", agent::inspect_inventory::build);
    catalog.insert("PlaceEntity", agent::place_entity::build);
    catalog.insert("PlaceNextTo", agent::place_entity_next_to::build);
    catalog.insert("PickUpEntity", agent::pickup_entity::build);
    catalog.insert("Sleep", agent::sleep::build);
    catalog.insert("ClearEntities", admin::clear_entities::build);
    catalog.insert("SetInventory", admin::set_inventory::build);
    catalog
});

/// Implementation identifier -> constructor.
pub fn catalog() -> &'static HashMap<&'static str, Constructor> {
    &CATALOG
}
