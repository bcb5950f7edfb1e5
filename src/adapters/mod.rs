//! Adapters: concrete implementations at the edges of the core.
//!
//! | Adapter     | Implements / serves | Connects to                 |
//! |-------------|---------------------|-----------------------------|
//! | `device_id` | identity            | eFuse MAC / host fake id    |
//! | `gatt`      | variable accessors  | a BLE stack's GATT server   |
//! | `nvs`       | StoragePort         | NVS / in-memory store       |

pub mod device_id;
pub mod gatt;
pub mod nvs;
