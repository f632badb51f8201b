mod error;

pub use error::{Error, Result};

use std::{env, future::Future, str::FromStr, thread};

use sqlx::{
	ConnectOptions, Connection, Executor,
	postgres::{PgConnectOptions, PgConnection},
};
use tokio::runtime::Builder;
use uuid::Uuid;

pub const DSN_ENV: &str = "DATALIVE_PG_DSN";

const DEFAULT_PREFIX: &str = "datalive_test";
const ADMIN_DATABASES: [&str; 2] = ["postgres", "template1"];
// Postgres truncates identifiers past this many bytes.
const MAX_IDENTIFIER_BYTES: usize = 63;

/// A disposable database on the server named by `DATALIVE_PG_DSN`.
///
/// Call [`TestDatabase::cleanup`] at the end of a test. If the value is dropped first (a failed
/// assertion, for instance) the database is force-dropped from a helper thread, and a leak is
/// reported by name when even that fails.
pub struct TestDatabase {
	name: String,
	dsn: String,
	admin_options: PgConnectOptions,
	cleaned: bool,
}
impl TestDatabase {
	pub async fn new(base_dsn: &str) -> Result<Self> {
		Self::with_prefix(base_dsn, DEFAULT_PREFIX).await
	}

	pub async fn with_prefix(base_dsn: &str, prefix: &str) -> Result<Self> {
		let base_options = PgConnectOptions::from_str(base_dsn)
			.map_err(|err| Error::Message(format!("{DSN_ENV} is not a valid DSN: {err}.")))?;
		let (admin_options, mut admin_conn) = connect_admin(&base_options).await?;
		let name = database_name(prefix);

		admin_conn
			.execute(format!(r#"CREATE DATABASE "{name}""#).as_str())
			.await
			.map_err(|err| Error::Message(format!("CREATE DATABASE {name} failed: {err}.")))?;

		let dsn = base_options.database(&name).to_url_lossy().to_string();

		Ok(Self { name, dsn, admin_options, cleaned: false })
	}

	pub fn dsn(&self) -> &str {
		&self.dsn
	}

	pub fn name(&self) -> &str {
		&self.name
	}

	pub async fn cleanup(mut self) -> Result<()> {
		self.drop_database().await
	}

	async fn drop_database(&mut self) -> Result<()> {
		if !self.cleaned {
			force_drop(&self.name, &self.admin_options).await?;

			self.cleaned = true;
		}

		Ok(())
	}
}
impl Drop for TestDatabase {
	fn drop(&mut self) {
		if self.cleaned {
			return;
		}

		let name = self.name.clone();
		let admin_options = self.admin_options.clone();
		// The dropping thread may be a runtime worker, so block on a fresh runtime elsewhere.
		let outcome = thread::spawn(move || -> Result<()> {
			let runtime = Builder::new_current_thread()
				.enable_all()
				.build()
				.map_err(|err| Error::Message(format!("Cleanup runtime failed: {err}.")))?;

			runtime.block_on(force_drop(&name, &admin_options))
		})
		.join();

		match outcome {
			Ok(Ok(())) => {},
			Ok(Err(err)) => eprintln!("Leaked test database {}: {err}", self.name),
			Err(_) => eprintln!("Leaked test database {}: cleanup thread panicked.", self.name),
		}
	}
}

/// The base DSN for live-database tests, or `None` when unset or blank.
pub fn env_dsn() -> Option<String> {
	env::var(DSN_ENV).ok().filter(|dsn| !dsn.trim().is_empty())
}

/// Runs `f` against a fresh database and drops it afterwards. A cleanup failure is reported
/// only when `f` itself succeeded.
pub async fn with_test_db<F, Fut, T>(base_dsn: &str, f: F) -> Result<T>
where
	F: FnOnce(&TestDatabase) -> Fut,
	Fut: Future<Output = Result<T>>,
{
	let mut db = TestDatabase::new(base_dsn).await?;
	let result = f(&db).await;
	let cleanup = db.drop_database().await;

	match (result, cleanup) {
		(Ok(value), Ok(())) => Ok(value),
		(Ok(_), Err(err)) => Err(err),
		(Err(err), _) => Err(err),
	}
}

/// `<prefix>_<uuid>` reduced to `[a-z0-9_]` and cut to the identifier limit.
fn database_name(prefix: &str) -> String {
	let mut name: String = format!("{prefix}_{}", Uuid::new_v4().simple())
		.chars()
		.map(|ch| if ch.is_ascii_alphanumeric() { ch.to_ascii_lowercase() } else { '_' })
		.collect();

	name.truncate(MAX_IDENTIFIER_BYTES);

	name
}

async fn connect_admin(
	base_options: &PgConnectOptions,
) -> Result<(PgConnectOptions, PgConnection)> {
	let mut failures = Vec::new();

	for database in ADMIN_DATABASES {
		let options = base_options.clone().database(database);

		match PgConnection::connect_with(&options).await {
			Ok(conn) => return Ok((options, conn)),
			Err(err) => failures.push(format!("{database}: {err}")),
		}
	}

	Err(Error::Message(format!("No admin database reachable ({}).", failures.join("; "))))
}

async fn force_drop(name: &str, admin_options: &PgConnectOptions) -> Result<()> {
	let mut conn = PgConnection::connect_with(admin_options).await?;

	// FORCE terminates sessions a test pool left open (Postgres 13+).
	conn.execute(format!(r#"DROP DATABASE IF EXISTS "{name}" WITH (FORCE)"#).as_str())
		.await
		.map_err(|err| Error::Message(format!("DROP DATABASE {name} failed: {err}.")))?;

	Ok(())
}
