//! Administrative capabilities, hidden from the public listing.

#[path = "clear_entities/client.rs"]
pub mod clear_entities;
#[path = "set_inventory/client.rs"]
pub mod set_inventory;
