/// Domain models
///
/// Plain data types shared by the repository contracts, the Postgres and
/// in-memory adapters, and the identity service.
///
/// # Models
///
/// - `user`: user accounts, addresses, soft-delete masking
/// - `role`: role catalog, user-role bindings, onboarding status enum
/// - `validation`: pending email/phone/password codes
/// - `wrong_signin`: brute-force counter
/// - `agency`: agency invites and agency-realtor links
/// - `device_token`: push tokens per device
/// - `session`: session rows swept by the session cleaner
/// - `audit`: append-only audit rows
/// - `media_job`: listing media processing jobs

pub mod agency;
pub mod audit;
pub mod device_token;
pub mod media_job;
pub mod role;
pub mod session;
pub mod user;
pub mod validation;
pub mod wrong_signin;

pub use agency::{AgencyInvite, AgencyRealtor};
pub use audit::{AuditRecord, AuditTable};
pub use device_token::DeviceToken;
pub use media_job::{MediaJob, MediaJobCallback, MediaJobStatus};
pub use role::{NewUserRole, Role, RoleSlug, RoleStatus, UserRole};
pub use session::Session;
pub use user::{Address, NewUser, User, UserAccount};
pub use validation::Validation;
pub use wrong_signin::WrongSignin;
