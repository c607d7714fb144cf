use super::guard::PathGuard;
use super::Result;
use serde::Serialize;
use std::fs;
use std::path::Path;

/// Node of the workspace listing returned by `GET /files`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum TreeNode {
    File {
        name: String,
        path: String,
    },
    Folder {
        name: String,
        path: String,
        children: Vec<TreeNode>,
    },
}

impl TreeNode {
    pub fn name(&self) -> &str {
        match self {
            TreeNode::File { name, .. } | TreeNode::Folder { name, .. } => name,
        }
    }

    pub fn path(&self) -> &str {
        match self {
            TreeNode::File { path, .. } | TreeNode::Folder { path, .. } => path,
        }
    }

    pub fn is_file(&self) -> bool {
        matches!(self, TreeNode::File { .. })
    }

    pub fn children(&self) -> &[TreeNode] {
        match self {
            TreeNode::File { .. } => &[],
            TreeNode::Folder { children, .. } => children,
        }
    }
}

/// Walks the workspace root. Always read from disk; nothing is cached.
pub fn build_tree(guard: &PathGuard) -> Result<TreeNode> {
    Ok(TreeNode::Folder {
        name: "workspace".to_string(),
        path: String::new(),
        children: read_children(guard, guard.root())?,
    })
}

fn read_children(guard: &PathGuard, dir: &Path) -> Result<Vec<TreeNode>> {
    let mut nodes = Vec::new();

    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        let name = entry.file_name().to_string_lossy().into_owned();
        let relative = guard.relative(&path);

        // Symlinks are listed as files so the walk never leaves the root.
        let node = if entry.file_type()?.is_dir() {
            TreeNode::Folder {
                name,
                path: relative,
                children: read_children(guard, &path)?,
            }
        } else {
            TreeNode::File {
                name,
                path: relative,
            }
        };
        nodes.push(node);
    }

    nodes.sort_by_cached_key(|node| (node.is_file(), node.name().to_lowercase()));
    Ok(nodes)
}
