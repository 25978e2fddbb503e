//! Open, copy, link and access options

use crate::cancel::CancellationToken;
use crate::error::{ProviderError, Result};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpenOption {
    Read,
    Write,
    Append,
    TruncateExisting,
    Create,
    CreateNew,
    DeleteOnClose,
    Sparse,
    Sync,
    Dsync,
    NoFollowLinks,
}

/// Validated set of [`OpenOption`]s
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct OpenOptions {
    pub read: bool,
    pub write: bool,
    pub append: bool,
    pub truncate_existing: bool,
    pub create: bool,
    pub create_new: bool,
    pub delete_on_close: bool,
    pub sparse: bool,
    pub sync: bool,
    pub dsync: bool,
    pub no_follow_links: bool,
}

impl OpenOptions {
    /// Collect and validate options
    ///
    /// `Read` with `Append` and `Append` with `TruncateExisting` are rejected.
    /// Without `Read` or `Write`, `Append` implies write and anything else implies read.
    pub fn from_options(options: &[OpenOption]) -> Result<Self> {
        let mut open_options = Self::default();
        for option in options {
            match option {
                OpenOption::Read => open_options.read = true,
                OpenOption::Write => open_options.write = true,
                OpenOption::Append => open_options.append = true,
                OpenOption::TruncateExisting => open_options.truncate_existing = true,
                OpenOption::Create => open_options.create = true,
                OpenOption::CreateNew => open_options.create_new = true,
                OpenOption::DeleteOnClose => open_options.delete_on_close = true,
                OpenOption::Sparse => open_options.sparse = true,
                OpenOption::Sync => open_options.sync = true,
                OpenOption::Dsync => open_options.dsync = true,
                OpenOption::NoFollowLinks => open_options.no_follow_links = true,
            }
        }
        open_options.validate()
    }

    pub fn validate(mut self) -> Result<Self> {
        if self.read && self.append {
            return Err(ProviderError::InvalidArgument("READ + APPEND not allowed".into()));
        }
        if self.append && self.truncate_existing {
            return Err(ProviderError::InvalidArgument(
                "APPEND + TRUNCATE_EXISTING not allowed".into(),
            ));
        }
        if !self.read && !self.write {
            if self.append {
                self.write = true;
            } else {
                self.read = true;
            }
        }
        Ok(self)
    }

    pub fn for_read() -> Self {
        Self {
            read: true,
            ..Self::default()
        }
    }

    /// `CREATE`, `TRUNCATE_EXISTING` and `WRITE`, like a plain output stream
    pub fn for_write() -> Self {
        Self {
            write: true,
            create: true,
            truncate_existing: true,
            ..Self::default()
        }
    }

    pub fn is_creating(&self) -> bool {
        self.create || self.create_new
    }
}

pub type ProgressListener = Arc<dyn Fn(u64) + Send + Sync>;

pub const DEFAULT_PROGRESS_INTERVAL: Duration = Duration::from_millis(500);

#[derive(Clone)]
pub enum CopyOption {
    ReplaceExisting,
    CopyAttributes,
    AtomicMove,
    NoFollowLinks,
    /// Called with the number of bytes copied since the previous call
    ProgressListener(ProgressListener, Duration),
}

impl fmt::Debug for CopyOption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CopyOption::ReplaceExisting => f.write_str("ReplaceExisting"),
            CopyOption::CopyAttributes => f.write_str("CopyAttributes"),
            CopyOption::AtomicMove => f.write_str("AtomicMove"),
            CopyOption::NoFollowLinks => f.write_str("NoFollowLinks"),
            CopyOption::ProgressListener(_, interval) => {
                write!(f, "ProgressListener({:?})", interval)
            }
        }
    }
}

/// Flattened [`CopyOption`]s
#[derive(Clone)]
pub struct CopyOptions {
    pub replace_existing: bool,
    pub copy_attributes: bool,
    pub atomic_move: bool,
    pub no_follow_links: bool,
    pub progress_interval: Duration,
    pub progress_listener: Option<ProgressListener>,
    pub cancellation: Option<CancellationToken>,
}

impl Default for CopyOptions {
    fn default() -> Self {
        Self {
            replace_existing: false,
            copy_attributes: false,
            atomic_move: false,
            no_follow_links: false,
            progress_interval: DEFAULT_PROGRESS_INTERVAL,
            progress_listener: None,
            cancellation: None,
        }
    }
}

impl fmt::Debug for CopyOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CopyOptions")
            .field("replace_existing", &self.replace_existing)
            .field("copy_attributes", &self.copy_attributes)
            .field("atomic_move", &self.atomic_move)
            .field("no_follow_links", &self.no_follow_links)
            .field("progress_interval", &self.progress_interval)
            .field("progress_listener", &self.progress_listener.is_some())
            .field("cancellable", &self.cancellation.is_some())
            .finish()
    }
}

impl CopyOptions {
    pub fn from_options(options: &[CopyOption]) -> Self {
        let mut copy_options = Self::default();
        for option in options {
            match option {
                CopyOption::ReplaceExisting => copy_options.replace_existing = true,
                CopyOption::CopyAttributes => copy_options.copy_attributes = true,
                CopyOption::AtomicMove => copy_options.atomic_move = true,
                CopyOption::NoFollowLinks => copy_options.no_follow_links = true,
                CopyOption::ProgressListener(listener, interval) => {
                    copy_options.progress_listener = Some(listener.clone());
                    copy_options.progress_interval = *interval;
                }
            }
        }
        copy_options
    }

    pub fn to_options(&self) -> Vec<CopyOption> {
        let mut options = Vec::new();
        if self.replace_existing {
            options.push(CopyOption::ReplaceExisting);
        }
        if self.copy_attributes {
            options.push(CopyOption::CopyAttributes);
        }
        if self.atomic_move {
            options.push(CopyOption::AtomicMove);
        }
        if self.no_follow_links {
            options.push(CopyOption::NoFollowLinks);
        }
        if let Some(listener) = &self.progress_listener {
            options.push(CopyOption::ProgressListener(
                listener.clone(),
                self.progress_interval,
            ));
        }
        options
    }

    pub fn with_progress(
        mut self,
        interval: Duration,
        listener: impl Fn(u64) + Send + Sync + 'static,
    ) -> Self {
        self.progress_interval = interval;
        self.progress_listener = Some(Arc::new(listener));
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }

    pub fn follow_links(&self) -> bool {
        !self.no_follow_links
    }

    pub fn report_progress(&self, bytes: u64) {
        if let Some(listener) = &self.progress_listener {
            listener(bytes);
        }
    }

    pub fn check_cancelled(&self) -> Result<()> {
        match &self.cancellation {
            Some(token) => token.check("copy cancelled"),
            None => Ok(()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LinkOption {
    NoFollowLinks,
}

/// `true` unless `NoFollowLinks` is present
pub fn follow_links(options: &[LinkOption]) -> bool {
    !options.contains(&LinkOption::NoFollowLinks)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AccessMode {
    Read,
    Write,
    Execute,
}

/// Access checks requested by a caller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AccessModes {
    pub read: bool,
    pub write: bool,
    pub execute: bool,
}

impl AccessModes {
    pub fn from_modes(modes: &[AccessMode]) -> Self {
        let mut access_modes = Self::default();
        for mode in modes {
            match mode {
                AccessMode::Read => access_modes.read = true,
                AccessMode::Write => access_modes.write = true,
                AccessMode::Execute => access_modes.execute = true,
            }
        }
        access_modes
    }

    /// Existence check only
    pub fn is_empty(&self) -> bool {
        !(self.read || self.write || self.execute)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_options_defaults() {
        let options = OpenOptions::from_options(&[]).unwrap();
        assert!(options.read && !options.write);

        let options = OpenOptions::from_options(&[OpenOption::Append]).unwrap();
        assert!(options.write && options.append && !options.read);
    }

    #[test]
    fn test_open_options_conflicts() {
        assert!(OpenOptions::from_options(&[OpenOption::Read, OpenOption::Append]).is_err());
        assert!(
            OpenOptions::from_options(&[OpenOption::Append, OpenOption::TruncateExisting]).is_err()
        );
    }

    #[test]
    fn test_copy_options_round_trip() {
        let options = CopyOptions::default()
            .with_progress(Duration::from_millis(100), |_| {});
        let rebuilt = CopyOptions::from_options(&options.to_options());
        assert!(rebuilt.progress_listener.is_some());
        assert_eq!(rebuilt.progress_interval, Duration::from_millis(100));
        assert!(!rebuilt.replace_existing);
    }

    #[test]
    fn test_access_modes() {
        assert!(AccessModes::from_modes(&[]).is_empty());
        let modes = AccessModes::from_modes(&[AccessMode::Write]);
        assert!(modes.write && !modes.read);
        assert!(!follow_links(&[LinkOption::NoFollowLinks]));
    }
}
