use std::collections::{HashMap, HashSet};
use std::fmt::Display;

use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TreeError {
    BadAddress(String),
    NotFound(String),
    AlreadyExists(String),
    NotADirectory(String),
    IsADirectory(String),
}

impl Display for TreeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TreeError::BadAddress(address) => write!(f, "wrong path format: {}", address),
            TreeError::NotFound(address) => write!(f, "path does not exist: {}", address),
            TreeError::AlreadyExists(address) => write!(f, "path already exists: {}", address),
            TreeError::NotADirectory(address) => write!(f, "not a directory: {}", address),
            TreeError::IsADirectory(address) => write!(f, "is a directory: {}", address),
        }
    }
}

impl std::error::Error for TreeError {}

/// A file or directory. Parent and children are plain addresses into the
/// node map, so the tree has no cyclic ownership and serializes as is.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TreeNode {
    pub address: String,
    pub is_directory: bool,
    pub children: Vec<String>,
    pub parent: String,
    pub chunks: Vec<String>,
    // chunk ids not yet confirmed by any file server
    pub pending: HashSet<String>,
}

const ROOT: &str = ".";

/// Address-keyed arena of path nodes rooted at ".". Removing a directory
/// is lazy: descendants stay in the map but become unreachable because an
/// ancestor is gone.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Tree {
    nodes: HashMap<String, TreeNode>,
}

impl Default for Tree {
    fn default() -> Self {
        Self::new()
    }
}

impl Tree {
    pub fn new() -> Self {
        let root = TreeNode {
            address: ROOT.to_owned(),
            is_directory: true,
            children: Vec::new(),
            parent: String::new(),
            chunks: Vec::new(),
            pending: HashSet::new(),
        };
        Tree {
            nodes: HashMap::from([(ROOT.to_owned(), root)]),
        }
    }

    pub fn create_file(&mut self, address: &str, chunks: Vec<String>) -> Result<(), TreeError> {
        let address = clean_address(address)?;
        if self.path_exists(&address).0 {
            return Err(TreeError::AlreadyExists(address));
        }
        let dir_path = parent_address(&address);
        if !self.directory_exists(&dir_path) {
            return Err(TreeError::NotFound(dir_path));
        }
        let pending = chunks.iter().cloned().collect();
        self.nodes.insert(
            address.clone(),
            TreeNode {
                address: address.clone(),
                is_directory: false,
                children: Vec::new(),
                parent: dir_path.clone(),
                chunks,
                pending,
            },
        );
        if let Some(dir) = self.nodes.get_mut(&dir_path) {
            dir.children.push(address);
        }
        Ok(())
    }

    pub fn create_directory(&mut self, address: &str) -> Result<(), TreeError> {
        let address = clean_address(address)?;
        if self.path_exists(&address).0 {
            return Err(TreeError::AlreadyExists(address));
        }
        let dir_path = parent_address(&address);
        if !self.directory_exists(&dir_path) {
            return Err(TreeError::NotFound(dir_path));
        }
        self.nodes.insert(
            address.clone(),
            TreeNode {
                address: address.clone(),
                is_directory: true,
                children: Vec::new(),
                parent: dir_path.clone(),
                chunks: Vec::new(),
                pending: HashSet::new(),
            },
        );
        if let Some(dir) = self.nodes.get_mut(&dir_path) {
            dir.children.push(address);
        }
        Ok(())
    }

    /// Removes a file and hands back its chunk ids so the caller can purge
    /// them from the holding file servers.
    pub fn remove_file(&mut self, address: &str) -> Result<Vec<String>, TreeError> {
        let address = clean_address(address)?;
        let (exists, is_directory) = self.path_exists(&address);
        if !exists {
            return Err(TreeError::NotFound(address));
        }
        if is_directory {
            return Err(TreeError::IsADirectory(address));
        }
        let node = self.detach(&address);
        Ok(node.map(|n| n.chunks).unwrap_or_default())
    }

    pub fn remove_directory(&mut self, address: &str) -> Result<(), TreeError> {
        let address = clean_address(address)?;
        if address == ROOT {
            return Err(TreeError::BadAddress(address));
        }
        if !self.directory_exists(&address) {
            return Err(TreeError::NotFound(address));
        }
        // descendants are left behind on purpose, an absent ancestor hides them
        self.detach(&address);
        Ok(())
    }

    pub fn copy_file(&mut self, from: &str, to: &str) -> Result<(), TreeError> {
        let from = clean_address(from)?;
        let to = clean_address(to)?;

        let (from_exists, from_is_dir) = self.path_exists(&from);
        if !from_exists {
            return Err(TreeError::NotFound(from));
        }
        if from_is_dir {
            return Err(TreeError::IsADirectory(from));
        }

        let full_path = if self.directory_exists(&to) {
            join_address(&to, basename(&from))
        } else if self.file_exists(&to) {
            return Err(TreeError::AlreadyExists(to));
        } else {
            to
        };
        if self.file_exists(&full_path) {
            return Err(TreeError::AlreadyExists(full_path));
        }
        let dir_path = parent_address(&full_path);
        if !self.directory_exists(&dir_path) {
            return Err(TreeError::NotFound(dir_path));
        }

        let source = self
            .nodes
            .get(&from)
            .ok_or_else(|| TreeError::NotFound(from.clone()))?;
        let copied = TreeNode {
            address: full_path.clone(),
            is_directory: false,
            children: Vec::new(),
            parent: dir_path.clone(),
            chunks: source.chunks.clone(),
            pending: HashSet::new(),
        };
        self.nodes.insert(full_path.clone(), copied);
        if let Some(dir) = self.nodes.get_mut(&dir_path) {
            dir.children.push(full_path);
        }
        Ok(())
    }

    pub fn move_file(&mut self, from: &str, to: &str) -> Result<(), TreeError> {
        self.copy_file(from, to)?;
        let _ = self.remove_file(from);
        Ok(())
    }

    /// Directory listing, directories suffixed with a slash.
    pub fn ls(&self, address: &str) -> Result<Vec<String>, TreeError> {
        let address = clean_address(address)?;
        if !self.directory_exists(&address) {
            return Err(TreeError::NotADirectory(address));
        }
        let dir = self
            .nodes
            .get(&address)
            .ok_or_else(|| TreeError::NotFound(address.clone()))?;
        let mut list = Vec::new();
        for child in &dir.children {
            if let Some(node) = self.nodes.get(child) {
                let mut name = basename(&node.address).to_owned();
                if node.is_directory {
                    name.push('/');
                }
                list.push(name);
            }
        }
        Ok(list)
    }

    /// Whether a cleaned address resolves to a reachable node, and whether
    /// that node is a directory.
    pub fn path_exists(&self, address: &str) -> (bool, bool) {
        let Ok(address) = clean_address(address) else {
            return (false, false);
        };
        match self.nodes.get(&address) {
            Some(node) => (self.parents_exist(node), node.is_directory),
            None => (false, false),
        }
    }

    pub fn file_exists(&self, address: &str) -> bool {
        let (exists, is_directory) = self.path_exists(address);
        exists && !is_directory
    }

    pub fn directory_exists(&self, address: &str) -> bool {
        let (exists, is_directory) = self.path_exists(address);
        exists && is_directory
    }

    pub fn get(&self, address: &str) -> Option<&TreeNode> {
        let address = clean_address(address).ok()?;
        self.nodes.get(&address)
    }

    /// Drops a chunk from the file's pending set once a replica confirmed.
    pub fn remove_pending(&mut self, file_address: &str, chunk_id: &str) -> bool {
        let Ok(address) = clean_address(file_address) else {
            return false;
        };
        match self.nodes.get_mut(&address) {
            Some(node) => node.pending.remove(chunk_id),
            None => false,
        }
    }

    fn parents_exist(&self, node: &TreeNode) -> bool {
        let mut current = node;
        // bounded walk, the arena cannot cycle but a bad snapshot might
        for _ in 0..self.nodes.len() {
            if current.address == ROOT {
                return true;
            }
            match self.nodes.get(&current.parent) {
                Some(parent) => current = parent,
                None => return false,
            }
        }
        false
    }

    fn detach(&mut self, address: &str) -> Option<TreeNode> {
        let node = self.nodes.remove(address)?;
        if let Some(parent) = self.nodes.get_mut(&node.parent) {
            parent.children.retain(|child| child != address);
        }
        Some(node)
    }
}

fn clean_address(address: &str) -> Result<String, TreeError> {
    if address.is_empty() {
        return Err(TreeError::BadAddress(address.to_owned()));
    }
    let valid = address
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.' | '/'));
    if !valid {
        return Err(TreeError::BadAddress(address.to_owned()));
    }
    let segments: Vec<&str> = address
        .split('/')
        .filter(|segment| !segment.is_empty() && *segment != ".")
        .collect();
    if segments.iter().any(|segment| *segment == "..") {
        return Err(TreeError::BadAddress(address.to_owned()));
    }
    if segments.is_empty() {
        return Ok(ROOT.to_owned());
    }
    Ok(segments.join("/"))
}

fn parent_address(address: &str) -> String {
    match address.rsplit_once('/') {
        Some((parent, _)) => parent.to_owned(),
        None => ROOT.to_owned(),
    }
}

fn basename(address: &str) -> &str {
    match address.rsplit_once('/') {
        Some((_, name)) => name,
        None => address,
    }
}

fn join_address(dir: &str, name: &str) -> String {
    if dir == ROOT {
        name.to_owned()
    } else {
        format!("{dir}/{name}")
    }
}
