/// Postgres persistence
///
/// # Modules
///
/// - `pool`: connection pool management with health checks
/// - `migrations`: embedded schema migrations
/// - `store`: [`PgStore`], every repository trait over sqlx transactions
/// - `ports`: device-token registry and photographer agendas, which run
///   outside the identity transaction
///
/// # Example
///
/// ```no_run
/// use toq_shared::db::{pool::{create_pool, DatabaseConfig}, PgStore};
/// use toq_shared::repository::{TransactionPort, UserRepository};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let pool = create_pool(DatabaseConfig::from_env()?).await?;
/// let store = PgStore::new(pool);
///
/// let mut tx = store.begin_read_only().await?;
/// let roles = store.list_roles(&mut tx).await?;
/// store.commit(tx).await?;
/// println!("{} roles", roles.len());
/// # Ok(())
/// # }
/// ```

pub mod migrations;
pub mod pool;
mod ports;
mod store;

pub use ports::{PgDeviceTokens, PgPhotoSessions};
pub use store::PgStore;
