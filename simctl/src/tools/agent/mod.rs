//! Capabilities bound on every agent's public namespace.

#[path = "inspect_inventory/client.rs"]
pub mod inspect_inventory;
#[path = "move_to/client.rs"]
pub mod move_to;
#[path = "pickup_entity/client.rs"]
pub mod pickup_entity;
#[path = "place_entity/client.rs"]
pub mod place_entity;
#[path = "place_entity_next_to/client.rs"]
pub mod place_entity_next_to;
#[path = "sleep/client.rs"]
pub mod sleep;
