//! In-memory POSIX file system
//!
//! A complete backend kept in one locked inode table. Files share their
//! content buffer with open channels, so deleting an open file behaves like
//! an unlink. Named volumes live in a process-wide [`FileSystemCache`].

use crate::attributes::{
    ContentProviderFileAttributes, FileKey, FileTimes, PosixFileAttributes, PosixGroup, PosixUser,
};
use crate::byte_string::ByteString;
use crate::cache::FileSystemCache;
use crate::cancel::CancellationToken;
use crate::channel::{ChannelBackend, DeleteOnCloseChannel, FileByteChannel, SeekableByteChannel};
use crate::config::ProviderConfig;
use crate::error::{ProviderError, Result};
use crate::file_system::{check_provider, FileSystem, FileSystemId};
use crate::mime::resolve_mime_type;
use crate::mode::{PosixFileMode, PosixFileType};
use crate::options::{CopyOptions, OpenOptions};
use crate::path::ByteStringListPath;
use crate::uri::UriAuthority;
use crate::watch::{PollingWatchService, WatchService};
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::SystemTime;

pub const SCHEME: &str = "memory";

const ROOT_INODE: u64 = 1;
const MAX_SYMLINK_HOPS: usize = 40;
const ROOT_USER: PosixUser = PosixUser { id: 0, name: None };
const ROOT_GROUP: PosixGroup = PosixGroup { id: 0, name: None };

static VOLUMES: Lazy<FileSystemCache<String, MemoryFileSystem>> = Lazy::new(FileSystemCache::new);

struct Content {
    bytes: Vec<u8>,
    modified: SystemTime,
}

impl Content {
    fn new(bytes: Vec<u8>, modified: SystemTime) -> Arc<Mutex<Self>> {
        Arc::new(Mutex::new(Self { bytes, modified }))
    }
}

enum NodeKind {
    File(Arc<Mutex<Content>>),
    Directory(BTreeMap<ByteString, u64>),
    Symlink(ByteString),
}

struct Node {
    kind: NodeKind,
    mode: PosixFileMode,
    owner: PosixUser,
    group: PosixGroup,
    /// Files keep theirs in the content buffer
    modified: SystemTime,
    accessed: SystemTime,
    created: SystemTime,
    selinux_context: Option<ByteString>,
}

impl Node {
    fn new(kind: NodeKind, mode: PosixFileMode) -> Self {
        let now = SystemTime::now();
        Self {
            kind,
            mode,
            owner: ROOT_USER,
            group: ROOT_GROUP,
            modified: now,
            accessed: now,
            created: now,
            selinux_context: None,
        }
    }
}

struct Tree {
    nodes: HashMap<u64, Node>,
    next_inode: u64,
}

impl Tree {
    fn new() -> Self {
        let mut nodes = HashMap::new();
        nodes.insert(
            ROOT_INODE,
            Node::new(NodeKind::Directory(BTreeMap::new()), PosixFileMode::from_int(0o755)),
        );
        Self {
            nodes,
            next_inode: ROOT_INODE + 1,
        }
    }

    fn node(&self, inode: u64) -> Result<&Node> {
        self.nodes
            .get(&inode)
            .ok_or_else(|| ProviderError::NoSuchFile(format!("inode {}", inode)))
    }

    fn node_mut(&mut self, inode: u64) -> Result<&mut Node> {
        self.nodes
            .get_mut(&inode)
            .ok_or_else(|| ProviderError::NoSuchFile(format!("inode {}", inode)))
    }

    fn entries(&self, inode: u64, path: &ByteStringListPath) -> Result<&BTreeMap<ByteString, u64>> {
        match &self.node(inode)?.kind {
            NodeKind::Directory(entries) => Ok(entries),
            _ => Err(ProviderError::NotDirectory(path.to_string())),
        }
    }

    fn entries_mut(
        &mut self,
        inode: u64,
        path: &ByteStringListPath,
    ) -> Result<&mut BTreeMap<ByteString, u64>> {
        let node = self.node_mut(inode)?;
        node.modified = SystemTime::now();
        match &mut node.kind {
            NodeKind::Directory(entries) => Ok(entries),
            _ => Err(ProviderError::NotDirectory(path.to_string())),
        }
    }

    /// Walk from the root; intermediate links are always followed
    fn lookup(&self, path: &ByteStringListPath, follow_last: bool) -> Result<u64> {
        let absolute = path.to_absolute_path()?;
        let mut pending: VecDeque<ByteString> = absolute.segments().iter().cloned().collect();
        let mut ancestors = vec![ROOT_INODE];
        let mut hops = 0;
        while let Some(name) = pending.pop_front() {
            if name.is_empty() || name == "." {
                continue;
            }
            if name == ".." {
                if ancestors.len() > 1 {
                    ancestors.pop();
                }
                continue;
            }
            let current = ancestors[ancestors.len() - 1];
            let child = *self
                .entries(current, path)?
                .get(&name)
                .ok_or_else(|| ProviderError::NoSuchFile(path.to_string()))?;
            if let NodeKind::Symlink(target) = &self.node(child)?.kind {
                if follow_last || !pending.is_empty() {
                    hops += 1;
                    if hops > MAX_SYMLINK_HOPS {
                        return Err(ProviderError::SymbolicLinkLoop(path.to_string()));
                    }
                    if target.starts_with(b"/") {
                        ancestors.truncate(1);
                    }
                    for segment in target.split(b"/").into_iter().rev() {
                        pending.push_front(segment);
                    }
                    continue;
                }
            }
            ancestors.push(child);
        }
        Ok(ancestors[ancestors.len() - 1])
    }

    /// Directory inode that holds `path`, and the entry name within it
    fn lookup_parent(&self, path: &ByteStringListPath) -> Result<(u64, ByteString)> {
        let absolute = path.to_absolute_path()?;
        let name = absolute
            .file_name_bytes()
            .ok_or_else(|| ProviderError::InvalidArgument(format!("{} has no parent", path)))?;
        if name == "." || name == ".." {
            return Err(ProviderError::InvalidArgument(format!("{} has no entry name", path)));
        }
        let parent = match absolute.parent() {
            Some(parent) => self.lookup(&parent, true)?,
            None => ROOT_INODE,
        };
        self.entries(parent, path)?;
        Ok((parent, name))
    }

    fn child(&self, parent: u64, name: &ByteString, path: &ByteStringListPath) -> Result<Option<u64>> {
        Ok(self.entries(parent, path)?.get(name).copied())
    }

    fn insert(&mut self, parent: u64, name: ByteString, node: Node, path: &ByteStringListPath) -> Result<u64> {
        if self.child(parent, &name, path)?.is_some() {
            return Err(ProviderError::FileAlreadyExists(path.to_string()));
        }
        let inode = self.next_inode;
        self.entries_mut(parent, path)?.insert(name, inode);
        self.nodes.insert(inode, node);
        self.next_inode += 1;
        Ok(inode)
    }

    fn remove(&mut self, parent: u64, name: &ByteString, path: &ByteStringListPath) -> Result<()> {
        let inode = self
            .child(parent, name, path)?
            .ok_or_else(|| ProviderError::NoSuchFile(path.to_string()))?;
        if let NodeKind::Directory(entries) = &self.node(inode)?.kind {
            if !entries.is_empty() {
                return Err(ProviderError::DirectoryNotEmpty(path.to_string()));
            }
        }
        self.entries_mut(parent, path)?.remove(name);
        self.nodes.remove(&inode);
        Ok(())
    }

    fn attributes(&self, inode: u64, device: u64) -> Result<PosixFileAttributes> {
        let node = self.node(inode)?;
        let (file_type, size, modified) = match &node.kind {
            NodeKind::File(content) => {
                let content = content.lock();
                (PosixFileType::RegularFile, content.bytes.len() as u64, content.modified)
            }
            NodeKind::Directory(_) => (PosixFileType::Directory, 0, node.modified),
            NodeKind::Symlink(target) => (PosixFileType::SymbolicLink, target.len() as u64, node.modified),
        };
        Ok(PosixFileAttributes {
            last_modified_time: modified,
            last_access_time: node.accessed,
            creation_time: node.created,
            file_type,
            size,
            file_key: Some(FileKey { device, inode }),
            owner: Some(node.owner.clone()),
            group: Some(node.group.clone()),
            mode: Some(node.mode),
            selinux_context: node.selinux_context.clone(),
        })
    }
}

/// Channel backend over a file's shared content buffer
struct MemoryBackend {
    content: Arc<Mutex<Content>>,
}

fn to_index(position: u64) -> Result<usize> {
    usize::try_from(position)
        .map_err(|_| ProviderError::InvalidArgument(format!("position {} out of range", position)))
}

impl ChannelBackend for MemoryBackend {
    fn read_at(&self, position: u64, size: usize, cancel: &CancellationToken) -> Result<Vec<u8>> {
        cancel.check("memory read cancelled")?;
        let content = self.content.lock();
        let start = to_index(position)?.min(content.bytes.len());
        let end = start.saturating_add(size).min(content.bytes.len());
        Ok(content.bytes[start..end].to_vec())
    }

    fn write_at(&self, position: u64, src: &[u8]) -> Result<()> {
        let start = to_index(position)?;
        let end = start
            .checked_add(src.len())
            .ok_or_else(|| ProviderError::InvalidArgument("write past addressable range".into()))?;
        let mut content = self.content.lock();
        if content.bytes.len() < end {
            content.bytes.resize(end, 0);
        }
        content.bytes[start..end].copy_from_slice(src);
        content.modified = SystemTime::now();
        Ok(())
    }

    fn append(&self, src: &[u8]) -> Result<()> {
        let mut content = self.content.lock();
        content.bytes.extend_from_slice(src);
        content.modified = SystemTime::now();
        Ok(())
    }

    fn truncate(&self, size: u64) -> Result<()> {
        let mut content = self.content.lock();
        content.bytes.truncate(to_index(size)?);
        content.modified = SystemTime::now();
        Ok(())
    }

    fn size(&self) -> Result<u64> {
        Ok(self.content.lock().bytes.len() as u64)
    }
}

pub struct MemoryFileSystem {
    id: FileSystemId,
    authority: UriAuthority,
    config: ProviderConfig,
    tree: Mutex<Tree>,
    read_only: AtomicBool,
}

impl MemoryFileSystem {
    /// An anonymous file system with default configuration
    pub fn new() -> Arc<Self> {
        Self::with_config(UriAuthority::EMPTY, &ProviderConfig::default())
    }

    pub fn with_config(authority: UriAuthority, config: &ProviderConfig) -> Arc<Self> {
        let file_system = Arc::new(Self {
            id: FileSystemId::next(),
            authority,
            config: config.clone(),
            tree: Mutex::new(Tree::new()),
            read_only: AtomicBool::new(false),
        });
        tracing::debug!("Memory file system {} created", file_system.id);
        file_system
    }

    /// The shared volume called `name`, created on first use
    pub fn volume(name: &str) -> Result<Arc<Self>> {
        if name.is_empty() || name.contains(['/', '@', ':']) {
            return Err(ProviderError::InvalidArgument(format!("bad volume name {:?}", name)));
        }
        VOLUMES.get_or_create(name.to_string(), |name| {
            tracing::info!("Creating memory volume {}", name);
            Ok(Self::with_config(
                UriAuthority::new(None, name.as_str(), None),
                &ProviderConfig::default(),
            ))
        })
    }

    /// Forget a volume; handles already given out stay usable
    pub fn close_volume(name: &str) -> bool {
        VOLUMES.remove(&name.to_string()).is_some()
    }

    /// Drop volumes nobody holds any more
    pub fn sweep_volumes() -> usize {
        VOLUMES.sweep()
    }

    pub fn set_read_only(&self, read_only: bool) {
        self.read_only.store(read_only, Ordering::SeqCst);
    }

    fn ensure_writable(&self) -> Result<()> {
        if self.is_read_only() {
            Err(ProviderError::ReadOnlyFileSystem)
        } else {
            Ok(())
        }
    }

    fn device(&self) -> u64 {
        self.id.value()
    }

    fn open_content(
        &self,
        path: &ByteStringListPath,
        options: &OpenOptions,
        mode: Option<PosixFileMode>,
    ) -> Result<Arc<Mutex<Content>>> {
        let writable = options.write || options.append;
        let mut tree = self.tree.lock();
        let (parent, name) = tree.lookup_parent(path)?;
        let Some(existing) = tree.child(parent, &name, path)? else {
            if !(writable && options.is_creating()) {
                return Err(ProviderError::NoSuchFile(path.to_string()));
            }
            let content = Content::new(Vec::new(), SystemTime::now());
            let mode = mode.unwrap_or(PosixFileMode::CREATE_FILE_DEFAULT);
            tree.insert(parent, name, Node::new(NodeKind::File(content.clone()), mode), path)?;
            return Ok(content);
        };
        if writable && options.create_new {
            return Err(ProviderError::FileAlreadyExists(path.to_string()));
        }
        let inode = match tree.node(existing)?.kind {
            NodeKind::Symlink(_) if options.no_follow_links => {
                return Err(ProviderError::SymbolicLinkLoop(path.to_string()));
            }
            NodeKind::Symlink(_) => tree.lookup(path, true)?,
            _ => existing,
        };
        let content = match &tree.node(inode)?.kind {
            NodeKind::File(content) => content.clone(),
            NodeKind::Directory(_) => return Err(ProviderError::IsDirectory(path.to_string())),
            NodeKind::Symlink(_) => return Err(ProviderError::SymbolicLinkLoop(path.to_string())),
        };
        if options.write && options.truncate_existing {
            let mut locked = content.lock();
            locked.bytes.clear();
            locked.modified = SystemTime::now();
        }
        Ok(content)
    }

    fn update_node(
        &self,
        path: &ByteStringListPath,
        follow_links: bool,
        update: impl FnOnce(&mut Node),
    ) -> Result<()> {
        check_provider(self.id, path)?;
        self.ensure_writable()?;
        let mut tree = self.tree.lock();
        let inode = tree.lookup(path, follow_links)?;
        update(tree.node_mut(inode)?);
        Ok(())
    }
}

impl FileSystem for MemoryFileSystem {
    fn id(&self) -> FileSystemId {
        self.id
    }

    fn scheme(&self) -> &str {
        SCHEME
    }

    fn uri_authority(&self) -> UriAuthority {
        self.authority.clone()
    }

    fn is_read_only(&self) -> bool {
        self.read_only.load(Ordering::SeqCst)
    }

    fn read_attributes(&self, path: &ByteStringListPath, follow_links: bool) -> Result<PosixFileAttributes> {
        check_provider(self.id, path)?;
        let tree = self.tree.lock();
        let inode = tree.lookup(path, follow_links)?;
        tree.attributes(inode, self.device())
    }

    fn read_content_provider_attributes(
        &self,
        path: &ByteStringListPath,
    ) -> Result<ContentProviderFileAttributes> {
        let attributes = self.read_attributes(path, true)?;
        Ok(ContentProviderFileAttributes {
            last_modified_time: attributes.last_modified_time,
            file_type: attributes.file_type,
            size: attributes.size,
            mime_type: Some(resolve_mime_type(path, &attributes)),
        })
    }

    fn set_times(&self, path: &ByteStringListPath, times: &FileTimes, follow_links: bool) -> Result<()> {
        self.update_node(path, follow_links, |node| {
            if let Some(modified) = times.last_modified_time {
                match &node.kind {
                    NodeKind::File(content) => content.lock().modified = modified,
                    _ => node.modified = modified,
                }
            }
            if let Some(accessed) = times.last_access_time {
                node.accessed = accessed;
            }
            if let Some(created) = times.creation_time {
                node.created = created;
            }
        })
    }

    fn set_mode(&self, path: &ByteStringListPath, mode: PosixFileMode, follow_links: bool) -> Result<()> {
        self.update_node(path, follow_links, |node| node.mode = mode)
    }

    fn set_owner(&self, path: &ByteStringListPath, owner: &PosixUser, follow_links: bool) -> Result<()> {
        self.update_node(path, follow_links, |node| node.owner = owner.clone())
    }

    fn set_group(&self, path: &ByteStringListPath, group: &PosixGroup, follow_links: bool) -> Result<()> {
        self.update_node(path, follow_links, |node| node.group = group.clone())
    }

    fn set_selinux_context(
        &self,
        path: &ByteStringListPath,
        context: &ByteString,
        follow_links: bool,
    ) -> Result<()> {
        self.update_node(path, follow_links, |node| node.selinux_context = Some(context.clone()))
    }

    fn list_directory(&self, path: &ByteStringListPath) -> Result<Vec<ByteStringListPath>> {
        check_provider(self.id, path)?;
        let names: Vec<ByteString> = {
            let tree = self.tree.lock();
            let inode = tree.lookup(path, true)?;
            tree.entries(inode, path)?.keys().cloned().collect()
        };
        names.iter().map(|name| path.resolve_name(name)).collect()
    }

    fn new_byte_channel(
        &self,
        path: &ByteStringListPath,
        options: &OpenOptions,
        mode: Option<PosixFileMode>,
    ) -> Result<Box<dyn SeekableByteChannel>> {
        check_provider(self.id, path)?;
        let options = options.validate()?;
        if options.write || options.append || options.delete_on_close {
            self.ensure_writable()?;
        }
        let content = self.open_content(path, &options, mode)?;
        let channel: Box<dyn SeekableByteChannel> = Box::new(FileByteChannel::new(
            MemoryBackend { content },
            &options,
            self.config.channel.to_read_policy(),
        ));
        if options.delete_on_close {
            return Ok(Box::new(DeleteOnCloseChannel::new(channel, path.clone())));
        }
        Ok(channel)
    }

    fn create_directory(&self, path: &ByteStringListPath, mode: Option<PosixFileMode>) -> Result<()> {
        check_provider(self.id, path)?;
        self.ensure_writable()?;
        let mut tree = self.tree.lock();
        if path.to_absolute_path()?.name_count() == 0 {
            return Err(ProviderError::FileAlreadyExists(path.to_string()));
        }
        let (parent, name) = tree.lookup_parent(path)?;
        let mode = mode.unwrap_or(PosixFileMode::CREATE_DIRECTORY_DEFAULT);
        tree.insert(parent, name, Node::new(NodeKind::Directory(BTreeMap::new()), mode), path)?;
        Ok(())
    }

    fn create_symbolic_link(&self, link: &ByteStringListPath, target: &ByteString) -> Result<()> {
        check_provider(self.id, link)?;
        self.ensure_writable()?;
        let mut tree = self.tree.lock();
        let (parent, name) = tree.lookup_parent(link)?;
        let node = Node::new(NodeKind::Symlink(target.clone()), PosixFileMode::from_int(0o777));
        tree.insert(parent, name, node, link)?;
        Ok(())
    }

    fn read_symbolic_link(&self, link: &ByteStringListPath) -> Result<ByteString> {
        check_provider(self.id, link)?;
        let tree = self.tree.lock();
        let inode = tree.lookup(link, false)?;
        match &tree.node(inode)?.kind {
            NodeKind::Symlink(target) => Ok(target.clone()),
            _ => Err(ProviderError::InvalidArgument(format!("{} is not a symbolic link", link))),
        }
    }

    fn delete(&self, path: &ByteStringListPath) -> Result<()> {
        check_provider(self.id, path)?;
        self.ensure_writable()?;
        let mut tree = self.tree.lock();
        let (parent, name) = tree.lookup_parent(path)?;
        tree.remove(parent, &name, path)
    }

    fn copy_native(&self, source: &ByteStringListPath, target: &ByteStringListPath, options: &CopyOptions) -> Result<()> {
        check_provider(self.id, source)?;
        check_provider(self.id, target)?;
        if options.atomic_move {
            return Err(ProviderError::Unsupported("atomic copy".into()));
        }
        self.ensure_writable()?;
        options.check_cancelled()?;
        let size = {
            let mut tree = self.tree.lock();
            let source_inode = tree.lookup(source, options.follow_links())?;
            let (parent, name) = tree.lookup_parent(target)?;
            if let Some(existing) = tree.child(parent, &name, target)? {
                if existing == source_inode {
                    return Ok(());
                }
                if !options.replace_existing {
                    return Err(ProviderError::FileAlreadyExists(target.to_string()));
                }
                tree.remove(parent, &name, target)?;
            }
            let node = tree.node(source_inode)?;
            let now = SystemTime::now();
            let (kind, size, modified) = match &node.kind {
                NodeKind::File(content) => {
                    let content = content.lock();
                    let copied = Content::new(content.bytes.clone(), content.modified);
                    (NodeKind::File(copied), content.bytes.len() as u64, content.modified)
                }
                NodeKind::Directory(_) => (NodeKind::Directory(BTreeMap::new()), 0, node.modified),
                NodeKind::Symlink(link_target) => {
                    (NodeKind::Symlink(link_target.clone()), link_target.len() as u64, node.modified)
                }
            };
            let mut copy = if options.copy_attributes {
                let mut copy = Node::new(kind, node.mode);
                copy.owner = node.owner.clone();
                copy.group = node.group.clone();
                copy.accessed = node.accessed;
                copy.created = node.created;
                copy
            } else {
                let mode = match node.kind {
                    NodeKind::File(_) => PosixFileMode::CREATE_FILE_DEFAULT,
                    _ => PosixFileMode::CREATE_DIRECTORY_DEFAULT,
                };
                let mut copy = Node::new(kind, mode);
                copy.accessed = now;
                copy
            };
            copy.modified = modified;
            tree.insert(parent, name, copy, target)?;
            size
        };
        options.report_progress(size);
        Ok(())
    }

    fn move_native(&self, source: &ByteStringListPath, target: &ByteStringListPath, options: &CopyOptions) -> Result<()> {
        check_provider(self.id, source)?;
        check_provider(self.id, target)?;
        self.ensure_writable()?;
        let source_absolute = source.to_absolute_path()?.normalize();
        let target_absolute = target.to_absolute_path()?.normalize();
        if target_absolute != source_absolute && target_absolute.starts_with(&source_absolute) {
            return Err(ProviderError::InvalidArgument(format!(
                "Cannot move {} into itself at {}",
                source, target
            )));
        }
        let mut tree = self.tree.lock();
        let (source_parent, source_name) = tree.lookup_parent(source)?;
        let source_inode = tree
            .child(source_parent, &source_name, source)?
            .ok_or_else(|| ProviderError::NoSuchFile(source.to_string()))?;
        let (target_parent, target_name) = tree.lookup_parent(target)?;
        if let Some(existing) = tree.child(target_parent, &target_name, target)? {
            if existing == source_inode {
                return Ok(());
            }
            if !options.replace_existing {
                return Err(ProviderError::FileAlreadyExists(target.to_string()));
            }
            tree.remove(target_parent, &target_name, target)?;
        }
        tree.entries_mut(source_parent, source)?.remove(&source_name);
        tree.entries_mut(target_parent, target)?.insert(target_name, source_inode);
        tracing::debug!("Moved {} to {}", source, target);
        Ok(())
    }

    fn new_watch_service(&self) -> Result<Box<dyn WatchService>> {
        Ok(Box::new(PollingWatchService::new(&self.config.watch)))
    }
}
