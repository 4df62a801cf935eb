//! Domain services over the store: credential slots, profile lifecycle,
//! and execution history.

pub mod credentials;
pub mod executions;
pub mod profiles;

pub use credentials::{CredentialError, CredentialInfo, CredentialService, ValueChange};
pub use executions::{ExecutionService, ExecutionStatus, LlmRequest};
pub use profiles::{
    AuthError, AuthenticatedProfile, CredentialRef, ExpiryChange, LockResult, ProfileError,
    ProfileInfo, ProfileService,
};
