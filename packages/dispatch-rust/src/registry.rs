use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use switchyard_core::{CommandInfo, HandlerError, Params, Value};

use crate::dispatcher::HandlerContext;

// ---------------------------------------------------------------------------
// Handler types
// ---------------------------------------------------------------------------

/// A registered command handler.
///
/// Receives the execution context (operation id, tracker access) and keyword-style
/// parameters; returns a dynamic value or a [`HandlerError`].
pub type CommandHandler =
    Arc<dyn Fn(&HandlerContext<'_>, &Params) -> Result<Value, HandlerError> + Send + Sync>;

/// A leaf of the registry: the handler plus its discovery metadata.
#[derive(Clone)]
pub struct CommandEntry {
    pub handler: CommandHandler,
    pub description: String,
}

impl fmt::Debug for CommandEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandEntry")
            .field("description", &self.description)
            .finish_non_exhaustive()
    }
}

#[derive(Debug)]
enum RegistryNode {
    Module(BTreeMap<String, RegistryNode>),
    Command(CommandEntry),
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Position of a path segment within a command path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentRole {
    /// First segment.
    Module,
    /// Any segment between the first and the last.
    Submodule,
    /// Last segment.
    Function,
}

impl SegmentRole {
    fn at(index: usize, len: usize) -> Self {
        if index == 0 {
            Self::Module
        } else if index + 1 == len {
            Self::Function
        } else {
            Self::Submodule
        }
    }
}

impl fmt::Display for SegmentRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Module => "Module",
            Self::Submodule => "Submodule",
            Self::Function => "Function",
        })
    }
}

/// Errors from populating the registry.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("command path needs a module and a function, got {len} segment(s)")]
    PathTooShort { len: usize },
    #[error("command path contains an empty segment")]
    EmptySegment,
    #[error("segment `{segment}` contains the command delimiter `{delimiter}`")]
    DelimiterInSegment { segment: String, delimiter: char },
    #[error("segment `{segment}` is already registered as a command")]
    Conflict { segment: String },
    #[error("command `{path}` is already registered")]
    AlreadyRegistered { path: String },
}

/// Failure to resolve a command path.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{role} not found: {segment}")]
pub struct ResolveError {
    /// The first segment that could not be resolved.
    pub segment: String,
    pub role: SegmentRole,
    /// Index of `segment` within the path.
    pub index: usize,
}

// ---------------------------------------------------------------------------
// CommandRegistry
// ---------------------------------------------------------------------------

/// Separator used by [`CommandRegistry::new`].
pub const DEFAULT_DELIMITER: char = '.';

/// Nested mapping from path segments to sub-modules or command handlers.
///
/// Populated once at startup; resolution walks the path segment by segment and
/// reports the first segment that does not resolve.
#[derive(Debug)]
pub struct CommandRegistry {
    root: BTreeMap<String, RegistryNode>,
    delimiter: char,
}

impl Default for CommandRegistry {
    fn default() -> Self {
        Self::with_delimiter(DEFAULT_DELIMITER)
    }
}

impl CommandRegistry {
    /// Creates an empty registry joining paths with `.`.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty registry whose command names are joined with `delimiter`.
    #[must_use]
    pub fn with_delimiter(delimiter: char) -> Self {
        Self {
            root: BTreeMap::new(),
            delimiter,
        }
    }

    #[must_use]
    pub fn delimiter(&self) -> char {
        self.delimiter
    }

    /// Registers `handler` at `path`, creating intermediate modules as needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the path is shorter than two segments, has an empty
    /// segment or one containing the delimiter, passes through an existing
    /// command, or is already taken.
    pub fn register<S, F>(
        &mut self,
        path: &[S],
        description: impl Into<String>,
        handler: F,
    ) -> Result<(), RegistryError>
    where
        S: AsRef<str>,
        F: Fn(&HandlerContext<'_>, &Params) -> Result<Value, HandlerError> + Send + Sync + 'static,
    {
        if path.len() < 2 {
            return Err(RegistryError::PathTooShort { len: path.len() });
        }
        if path.iter().any(|s| s.as_ref().is_empty()) {
            return Err(RegistryError::EmptySegment);
        }
        // A joined name must split back into the same path.
        let delimiter = self.delimiter;
        if let Some(segment) = path
            .iter()
            .map(AsRef::<str>::as_ref)
            .find(|s| s.contains(delimiter))
        {
            return Err(RegistryError::DelimiterInSegment {
                segment: segment.to_string(),
                delimiter: self.delimiter,
            });
        }

        let (last, parents) = path.split_last().ok_or(RegistryError::PathTooShort { len: 0 })?;
        let mut level = &mut self.root;
        for segment in parents {
            let node = level
                .entry(segment.as_ref().to_string())
                .or_insert_with(|| RegistryNode::Module(BTreeMap::new()));
            level = match node {
                RegistryNode::Module(children) => children,
                RegistryNode::Command(_) => {
                    return Err(RegistryError::Conflict {
                        segment: segment.as_ref().to_string(),
                    })
                }
            };
        }

        let key = last.as_ref().to_string();
        if level.contains_key(&key) {
            let joined: Vec<&str> = path.iter().map(|s| s.as_ref()).collect();
            return Err(RegistryError::AlreadyRegistered {
                path: joined.join(&self.delimiter.to_string()),
            });
        }
        level.insert(
            key,
            RegistryNode::Command(CommandEntry {
                handler: Arc::new(handler),
                description: description.into(),
            }),
        );
        Ok(())
    }

    /// Resolves `path` to its command entry.
    ///
    /// # Errors
    ///
    /// Returns a [`ResolveError`] naming the first unresolved segment and its role.
    pub fn resolve<S: AsRef<str>>(&self, path: &[S]) -> Result<&CommandEntry, ResolveError> {
        let len = path.len();
        let mut level = &self.root;
        for (index, segment) in path.iter().enumerate() {
            let is_last = index + 1 == len;
            match level.get(segment.as_ref()) {
                Some(RegistryNode::Module(children)) if !is_last => level = children,
                Some(RegistryNode::Command(entry)) if is_last => return Ok(entry),
                // A command cannot have children: the next segment is the miss.
                Some(RegistryNode::Command(_)) => {
                    return Err(ResolveError {
                        segment: path[index + 1].as_ref().to_string(),
                        role: SegmentRole::at(index + 1, len),
                        index: index + 1,
                    })
                }
                _ => {
                    return Err(ResolveError {
                        segment: segment.as_ref().to_string(),
                        role: SegmentRole::at(index, len),
                        index,
                    })
                }
            }
        }
        Err(ResolveError {
            segment: String::new(),
            role: SegmentRole::Module,
            index: 0,
        })
    }

    /// Flattened map of full command name to discovery metadata.
    #[must_use]
    pub fn commands(&self) -> BTreeMap<String, CommandInfo> {
        let mut out = BTreeMap::new();
        for (name, node) in &self.root {
            collect(node, name.clone(), self.delimiter, &mut out);
        }
        out
    }

    /// Number of registered commands.
    #[must_use]
    pub fn len(&self) -> usize {
        fn count(nodes: &BTreeMap<String, RegistryNode>) -> usize {
            nodes
                .values()
                .map(|node| match node {
                    RegistryNode::Module(children) => count(children),
                    RegistryNode::Command(_) => 1,
                })
                .sum()
        }
        count(&self.root)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.root.is_empty()
    }
}

fn collect(
    node: &RegistryNode,
    prefix: String,
    delimiter: char,
    out: &mut BTreeMap<String, CommandInfo>,
) {
    match node {
        RegistryNode::Module(children) => {
            for (name, child) in children {
                collect(child, format!("{prefix}{delimiter}{name}"), delimiter, out);
            }
        }
        RegistryNode::Command(entry) => {
            out.insert(
                prefix.clone(),
                CommandInfo {
                    name: prefix,
                    description: entry.description.clone(),
                },
            );
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
