//! Reference adapters: local-file input/output and two generic
//! guest-conversion modules, all implemented against the trait contracts in
//! `v2kvm_core`.

pub mod appliance;
pub mod domain;
pub mod local_input;
pub mod local_output;
pub mod modules;
pub mod xml_utils;

pub use appliance::GuestfishAppliance;
pub use local_input::LocalFileInput;
pub use local_output::LocalFileOutput;
pub use modules::{GenericLinuxModule, GenericWindowsStub};
