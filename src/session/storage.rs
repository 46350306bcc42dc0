//! Persistence for the client's token pair.

// std
use std::{
	fmt::Debug,
	io::ErrorKind,
	path::{Path, PathBuf},
	sync::{Mutex, PoisonError},
};
// crates.io
use async_trait::async_trait;
use tokio::fs;
// self
use crate::{_prelude::*, session::state::SessionTokens};

/// Durable home of the token pair between process restarts.
#[async_trait]
pub trait SessionStorage: Debug + Send + Sync {
	/// Load the stored pair, if any.
	async fn load(&self) -> Result<Option<SessionTokens>>;

	/// Replace the stored pair.
	async fn save(&self, tokens: &SessionTokens) -> Result<()>;

	/// Forget the stored pair.
	async fn clear(&self) -> Result<()>;
}

/// Process-local storage.
#[derive(Debug, Default)]
pub struct MemorySessionStorage {
	tokens: Mutex<Option<SessionTokens>>,
}
impl MemorySessionStorage {
	/// Empty storage.
	pub fn new() -> Self {
		Self::default()
	}

	/// Storage pre-seeded with a pair.
	pub fn with_tokens(tokens: SessionTokens) -> Self {
		Self { tokens: Mutex::new(Some(tokens)) }
	}

	/// Currently stored pair.
	pub fn snapshot(&self) -> Option<SessionTokens> {
		self.tokens.lock().unwrap_or_else(PoisonError::into_inner).clone()
	}
}
#[async_trait]
impl SessionStorage for MemorySessionStorage {
	async fn load(&self) -> Result<Option<SessionTokens>> {
		Ok(self.snapshot())
	}

	async fn save(&self, tokens: &SessionTokens) -> Result<()> {
		*self.tokens.lock().unwrap_or_else(PoisonError::into_inner) = Some(tokens.clone());

		Ok(())
	}

	async fn clear(&self) -> Result<()> {
		self.tokens.lock().unwrap_or_else(PoisonError::into_inner).take();

		Ok(())
	}
}

/// JSON file holding the two token strings.
///
/// Writes go to a sibling temporary file that is then renamed over the target, so a crash never
/// leaves a half-written pair behind. On Unix the file is readable by its owner only.
#[derive(Clone, Debug)]
pub struct FileSessionStorage {
	path: PathBuf,
}
impl FileSessionStorage {
	/// Storage at `path`.
	pub fn new(path: impl Into<PathBuf>) -> Self {
		Self { path: path.into() }
	}

	/// Target file.
	pub fn path(&self) -> &Path {
		&self.path
	}

	fn staging_path(&self) -> PathBuf {
		let mut staging = self.path.clone().into_os_string();

		staging.push(".tmp");

		staging.into()
	}
}
#[async_trait]
impl SessionStorage for FileSessionStorage {
	async fn load(&self) -> Result<Option<SessionTokens>> {
		let bytes = match fs::read(&self.path).await {
			Ok(bytes) => bytes,
			Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
			Err(err) => return Err(err.into()),
		};
		let stored = serde_json::from_slice::<SessionTokens>(&bytes)?;

		Ok(Some(SessionTokens::from_pair(stored.access_token, stored.refresh_token)))
	}

	async fn save(&self, tokens: &SessionTokens) -> Result<()> {
		if let Some(parent) = self.path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
			fs::create_dir_all(parent).await?;
		}

		let staging = self.staging_path();

		fs::write(&staging, serde_json::to_vec(tokens)?).await?;

		#[cfg(unix)]
		{
			use std::os::unix::fs::PermissionsExt;

			fs::set_permissions(&staging, std::fs::Permissions::from_mode(0o600)).await?;
		}

		fs::rename(&staging, &self.path).await?;

		Ok(())
	}

	async fn clear(&self) -> Result<()> {
		match fs::remove_file(&self.path).await {
			Ok(()) => Ok(()),
			Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
			Err(err) => Err(err.into()),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn scratch_path(name: &str) -> PathBuf {
		let nanos = SystemTime::now()
			.duration_since(SystemTime::UNIX_EPOCH)
			.map(|elapsed| elapsed.as_nanos())
			.unwrap_or_default();

		std::env::temp_dir()
			.join(format!("portal-auth-{}-{nanos}", std::process::id()))
			.join(name)
	}

	#[tokio::test]
	async fn file_storage_round_trips_and_clears() {
		let storage = FileSessionStorage::new(scratch_path("session.json"));

		assert!(storage.load().await.expect("empty load").is_none());

		storage.save(&SessionTokens::from_pair("access", "refresh")).await.expect("save");

		let loaded = storage.load().await.expect("load").expect("stored pair");

		assert_eq!(loaded.access_token, "access");
		assert_eq!(loaded.refresh_token, "refresh");

		storage.clear().await.expect("clear");
		storage.clear().await.expect("clear twice");

		assert!(storage.load().await.expect("load after clear").is_none());

		if let Some(dir) = storage.path().parent() {
			let _ = std::fs::remove_dir_all(dir);
		}
	}

	#[tokio::test]
	async fn memory_storage_clears() {
		let storage = MemorySessionStorage::with_tokens(SessionTokens::from_pair("a", "r"));

		storage.clear().await.expect("clear");

		assert!(storage.snapshot().is_none());
	}
}
