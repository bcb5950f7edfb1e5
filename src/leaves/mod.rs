//! Reference leaves.
//!
//! | Leaf       | Hardware                    | Cells                                |
//! |------------|-----------------------------|--------------------------------------|
//! | `settings` | [`StoragePort`] store       | none; registers `setting`            |
//! | `led`      | `OutputPin`                 | `_ok` `_on` `_blinks`, setting `_duty` |
//! | `keypad`   | PCF8574 on `I2c`            | `_ok` `_pins` `_event`, settings `_addr` `_interval` |
//!
//! [`StoragePort`]: crate::ports::StoragePort

pub mod keypad;
pub mod led;
pub mod settings;
