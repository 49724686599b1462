//! Tree positions
//!
//! A [`Path`] is the sequence of edges from the root to a node. Its text form
//! is a bit string: `0` for a left edge, `1` for a right edge. The root has
//! the empty path.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::Error;

/// Edge label between a node and one of its children
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    Left,
    Right,
}

impl Direction {
    /// Edge bit: `false` for left, `true` for right
    pub fn bit(self) -> bool {
        matches!(self, Direction::Right)
    }

    pub fn from_bit(bit: bool) -> Self {
        if bit {
            Direction::Right
        } else {
            Direction::Left
        }
    }

    pub fn opposite(self) -> Self {
        match self {
            Direction::Left => Direction::Right,
            Direction::Right => Direction::Left,
        }
    }

    fn symbol(self) -> char {
        match self {
            Direction::Left => '0',
            Direction::Right => '1',
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Left => write!(f, "left"),
            Direction::Right => write!(f, "right"),
        }
    }
}

/// Position of a node, as the edges taken from the root
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Path(Vec<Direction>);

impl Path {
    /// The root's path
    pub fn root() -> Self {
        Self(Vec::new())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn push(&mut self, direction: Direction) {
        self.0.push(direction);
    }

    /// Path of the child reached by taking `direction` from here
    pub fn child(&self, direction: Direction) -> Self {
        let mut edges = Vec::with_capacity(self.0.len() + 1);
        edges.extend_from_slice(&self.0);
        edges.push(direction);
        Self(edges)
    }

    /// Path of the parent, `None` for the root
    pub fn parent(&self) -> Option<Self> {
        if self.0.is_empty() {
            return None;
        }
        Some(Self(self.0[..self.0.len() - 1].to_vec()))
    }

    /// Edge from the parent, `None` for the root
    pub fn last(&self) -> Option<Direction> {
        self.0.last().copied()
    }

    pub fn directions(&self) -> &[Direction] {
        &self.0
    }

    pub fn iter(&self) -> impl Iterator<Item = Direction> + '_ {
        self.0.iter().copied()
    }

    /// Longest common prefix; the path of the lowest common ancestor
    pub fn common_prefix(&self, other: &Path) -> Path {
        let shared = self
            .0
            .iter()
            .zip(other.0.iter())
            .take_while(|(a, b)| a == b)
            .count();
        Self(self.0[..shared].to_vec())
    }

    pub fn is_prefix_of(&self, other: &Path) -> bool {
        other.0.starts_with(&self.0)
    }
}

impl From<Vec<Direction>> for Path {
    fn from(edges: Vec<Direction>) -> Self {
        Self(edges)
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for direction in &self.0 {
            write!(f, "{}", direction.symbol())?;
        }
        Ok(())
    }
}

impl FromStr for Path {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.chars()
            .map(|c| match c {
                '0' => Ok(Direction::Left),
                '1' => Ok(Direction::Right),
                other => Err(Error::InvalidPath(other)),
            })
            .collect::<Result<Vec<_>, _>>()
            .map(Self)
    }
}
