//! Translation between linear positions and stable character anchors.

use super::{to_usize, Id, TextError, TextNode, TextTree, ROOT_SITE};
use serde::{Deserialize, Serialize};

/// A stable anchor into a [`TextTree`].
///
/// `pre` anchors name the character left of a position, `post` anchors the
/// character right of it. The document start and end are the sentinels
/// `(0, "root")` and `(1, "root")`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Loc {
    /// Character counter within its site
    pub id: u64,
    /// Site that minted the character
    pub site: String,
    /// Anchored to the left of the position
    pub pre: bool,
}

impl Loc {
    /// The document start.
    #[must_use]
    pub fn start() -> Self {
        Self {
            id: 0,
            site: ROOT_SITE.to_string(),
            pre: true,
        }
    }

    /// The document end.
    #[must_use]
    pub fn end() -> Self {
        Self {
            id: 1,
            site: ROOT_SITE.to_string(),
            pre: false,
        }
    }

    /// Anchor on a character.
    #[must_use]
    pub fn at(id: &Id, pre: bool) -> Self {
        Self {
            id: id.counter,
            site: id.site.clone(),
            pre,
        }
    }

    pub(super) fn is_start(&self) -> bool {
        self.site == ROOT_SITE && self.id == 0
    }
}

impl TextTree {
    /// Anchor for position `pos`.
    ///
    /// With `anchor_left` the result names the character at `pos - 1` (or
    /// the start sentinel); otherwise the character at `pos` (or the end
    /// sentinel).
    ///
    /// # Errors
    ///
    /// Returns [`TextError::PositionOutOfBounds`] if `pos > len()`, or
    /// [`TextError::StructuralInconsistency`] if size caches are corrupt.
    pub fn pos_to_loc(&self, pos: usize, anchor_left: bool) -> Result<Loc, TextError> {
        let len = self.len();
        if pos > len {
            return Err(TextError::PositionOutOfBounds { pos, len });
        }
        let (id, site) = if anchor_left {
            self.pre_anchor(pos)?
        } else {
            self.post_anchor(pos)?
        };
        Ok(Loc {
            id,
            site,
            pre: anchor_left,
        })
    }

    /// Position an anchor currently denotes.
    ///
    /// An anchor on a deleted character resolves to where that character
    /// would be.
    ///
    /// # Errors
    ///
    /// Returns [`TextError::MissingNode`] if the character is unknown here.
    pub fn loc_to_pos(&self, loc: &Loc) -> Result<usize, TextError> {
        if loc.site == ROOT_SITE {
            return Ok(if loc.id == 0 { 0 } else { self.len() });
        }
        let node = self
            .owner(loc.id, &loc.site)
            .ok_or_else(|| TextError::MissingNode(Id::new(loc.id, loc.site.clone())))?;
        let before = self.chars_before(node)?;
        if node.deleted {
            return Ok(before);
        }
        Ok(before + to_usize(loc.id - node.id.counter) + usize::from(loc.pre))
    }

    fn pre_anchor(&self, pos: usize) -> Result<(u64, String), TextError> {
        if pos == 0 {
            return Ok((0, ROOT_SITE.to_string()));
        }
        let mut remaining = pos;
        let mut candidates: &[Id] = &self.roots;
        'descend: loop {
            for id in candidates {
                let node = self.expect_node(id)?;
                if remaining > node.size {
                    remaining -= node.size;
                    continue;
                }
                if !node.deleted {
                    let own = node.char_len();
                    if remaining <= own {
                        return Ok((node.id.counter + (remaining - 1) as u64, node.id.site.clone()));
                    }
                    remaining -= own;
                }
                candidates = &node.children;
                continue 'descend;
            }
            return Err(lost(pos));
        }
    }

    fn post_anchor(&self, pos: usize) -> Result<(u64, String), TextError> {
        let mut remaining = pos;
        let mut candidates: &[Id] = &self.roots;
        let mut at_root = true;
        'descend: loop {
            for id in candidates {
                let node = self.expect_node(id)?;
                if remaining >= node.size {
                    remaining -= node.size;
                    continue;
                }
                if !node.deleted {
                    let own = node.char_len();
                    if remaining < own {
                        return Ok((node.id.counter + remaining as u64, node.id.site.clone()));
                    }
                    remaining -= own;
                }
                candidates = &node.children;
                at_root = false;
                continue 'descend;
            }
            if at_root && remaining == 0 {
                return Ok((1, ROOT_SITE.to_string()));
            }
            return Err(lost(pos));
        }
    }

    /// Live characters preceding `node`'s own text.
    fn chars_before(&self, node: &TextNode) -> Result<usize, TextError> {
        let mut total = 0;
        let mut current = node;
        loop {
            let siblings = self.children_of(current.parent.as_ref())?;
            let idx = siblings
                .iter()
                .position(|sibling| *sibling == current.id)
                .ok_or_else(|| {
                    TextError::StructuralInconsistency(format!(
                        "{} is missing from its parent's children",
                        current.id
                    ))
                })?;
            for sibling in &siblings[..idx] {
                total += self.expect_node(sibling)?.size;
            }
            match &current.parent {
                None => return Ok(total),
                Some(parent) => {
                    current = self.expect_node(parent)?;
                    total += current.live_len();
                }
            }
        }
    }
}

fn lost(pos: usize) -> TextError {
    TextError::StructuralInconsistency(format!(
        "position {pos} not found although size caches cover it"
    ))
}
