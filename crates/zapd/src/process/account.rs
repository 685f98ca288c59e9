//! Resolves the account the daemon runs as.

use std::path::{Path, PathBuf};

use nix::unistd::{Gid, Group, Uid, User};

use super::errors::ConfigError;

/// A resolved run-as user and group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunAs {
    user: String,
    group: String,
    uid: Uid,
    gid: Gid,
    home: PathBuf,
}

impl RunAs {
    /// Looks up `user` and `group` in the system account database.
    pub fn resolve(user: &str, group: &str) -> Result<Self, ConfigError> {
        let account = User::from_name(user)
            .map_err(|source| ConfigError::Lookup {
                name: user.to_owned(),
                source,
            })?
            .ok_or_else(|| ConfigError::UnknownUser {
                user: user.to_owned(),
            })?;
        let group_entry = Group::from_name(group)
            .map_err(|source| ConfigError::Lookup {
                name: group.to_owned(),
                source,
            })?
            .ok_or_else(|| ConfigError::UnknownGroup {
                group: group.to_owned(),
            })?;
        Ok(Self {
            user: account.name,
            group: group_entry.name,
            uid: account.uid,
            gid: group_entry.gid,
            home: account.dir,
        })
    }

    /// User name.
    #[must_use]
    pub fn user(&self) -> &str {
        &self.user
    }

    /// Group name.
    #[must_use]
    pub fn group(&self) -> &str {
        &self.group
    }

    /// Numeric user id.
    #[must_use]
    pub const fn uid(&self) -> Uid {
        self.uid
    }

    /// Numeric group id.
    #[must_use]
    pub const fn gid(&self) -> Gid {
        self.gid
    }

    /// Home directory; the daemon's working directory after start-up.
    #[must_use]
    pub fn home(&self) -> &Path {
        &self.home
    }
}
