pub mod driver;
pub mod ipam;
pub mod ledger;
pub mod protocol;
pub mod provisioner;
pub mod record;
pub mod rest;
pub mod state;

pub use driver::{DriverError, NetworkDriver};
pub use ipam::IpamDriver;
pub use ledger::Ledger;
pub use provisioner::{CliProvisioner, Provisioner, ProvisionerConfig};
pub use state::StateStore;
