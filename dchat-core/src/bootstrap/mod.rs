//! Identity bootstrap artifacts

mod provisioner;

pub use provisioner::{
    LocalProvisioner, ProvisionError, ProvisionResult, ProvisionedIdentity, Provisioner, StaticProvisioner,
    AUTH_FILE, CREDENTIALS_FILE, SEED_FILE,
};
