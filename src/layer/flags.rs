use std::ops::{BitOr, BitOrAssign};

/// Entity state bits a portion carries
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct EntityFlags(u32);

impl EntityFlags {
    pub const NONE: EntityFlags = EntityFlags(0);
    pub const VISIBLE: EntityFlags = EntityFlags(1 << 0);
    pub const CULLED: EntityFlags = EntityFlags(1 << 1);
    pub const PICKABLE: EntityFlags = EntityFlags(1 << 2);
    pub const CLIPPABLE: EntityFlags = EntityFlags(1 << 3);
    pub const COLLIDABLE: EntityFlags = EntityFlags(1 << 4);
    pub const CAST_SHADOW: EntityFlags = EntityFlags(1 << 5);
    pub const RECEIVE_SHADOW: EntityFlags = EntityFlags(1 << 6);
    pub const XRAYED: EntityFlags = EntityFlags(1 << 7);
    pub const HIGHLIGHTED: EntityFlags = EntityFlags(1 << 8);
    pub const SELECTED: EntityFlags = EntityFlags(1 << 9);
    pub const EDGES: EntityFlags = EntityFlags(1 << 10);
    pub const BACKFACES: EntityFlags = EntityFlags(1 << 11);
    pub const TRANSPARENT: EntityFlags = EntityFlags(1 << 12);

    pub const fn from_bits(bits: u32) -> EntityFlags {
        EntityFlags(bits)
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub const fn contains(self, other: EntityFlags) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn set(&mut self, flag: EntityFlags, on: bool) {
        if on {
            self.0 |= flag.0;
        } else {
            self.0 &= !flag.0;
        }
    }

    pub fn with(mut self, flag: EntityFlags, on: bool) -> EntityFlags {
        self.set(flag, on);
        self
    }
}

impl BitOr for EntityFlags {
    type Output = EntityFlags;

    fn bitor(self, rhs: EntityFlags) -> EntityFlags {
        EntityFlags(self.0 | rhs.0)
    }
}

impl BitOrAssign for EntityFlags {
    fn bitor_assign(&mut self, rhs: EntityFlags) {
        self.0 |= rhs.0;
    }
}

/// Pass selector values the vertex shader compares against `renderPass`
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum RenderPass {
    NotRendered = 0,
    ColorOpaque = 1,
    ColorTransparent = 2,
    SilhouetteHighlighted = 3,
    SilhouetteSelected = 4,
    SilhouetteXRayed = 5,
    EdgesColorOpaque = 6,
    EdgesColorTransparent = 7,
    EdgesHighlighted = 8,
    EdgesSelected = 9,
    EdgesXRayed = 10,
    Pick = 11,
}

/// Nibble of the flags word that gates a technique
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PassNibble {
    Color,
    Silhouette,
    Edges,
    Pick,
}

impl PassNibble {
    pub fn shift(self) -> u32 {
        match self {
            PassNibble::Color => 0,
            PassNibble::Silhouette => 4,
            PassNibble::Edges => 8,
            PassNibble::Pick => 12,
        }
    }
}

pub const CLIPPABLE_SHIFT: u32 = 16;

/// Scene emphasis settings that affect flag packing
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GlowThrough {
    pub highlighted: bool,
    pub selected: bool,
}

impl Default for GlowThrough {
    fn default() -> Self {
        GlowThrough {
            highlighted: true,
            selected: true,
        }
    }
}

/// Pass selectors of one portion
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PassFlags {
    pub color: RenderPass,
    pub silhouette: RenderPass,
    pub edges: RenderPass,
    pub pick: RenderPass,
}

impl PassFlags {
    /// GPU flags word; the clippable bit sits above the four selectors
    pub fn pack(self, clippable: bool) -> u32 {
        (self.color as u32)
            | (self.silhouette as u32) << PassNibble::Silhouette.shift()
            | (self.edges as u32) << PassNibble::Edges.shift()
            | (self.pick as u32) << PassNibble::Pick.shift()
            | (clippable as u32) << CLIPPABLE_SHIFT
    }
}

/// Derive the pass selectors of a portion from its entity state
pub fn col_silh_edge_pick_flags(
    flags: EntityFlags,
    transparent: bool,
    has_edges: bool,
    glow: GlowThrough,
) -> PassFlags {
    let visible = flags.contains(EntityFlags::VISIBLE);
    let culled = flags.contains(EntityFlags::CULLED);
    let xrayed = flags.contains(EntityFlags::XRAYED);
    let highlighted = flags.contains(EntityFlags::HIGHLIGHTED);
    let selected = flags.contains(EntityFlags::SELECTED);
    let edges = flags.contains(EntityFlags::EDGES);
    let pickable = flags.contains(EntityFlags::PICKABLE);

    if !visible || culled {
        return PassFlags {
            color: RenderPass::NotRendered,
            silhouette: RenderPass::NotRendered,
            edges: RenderPass::NotRendered,
            pick: RenderPass::NotRendered,
        };
    }

    let color = if xrayed || (highlighted && !glow.highlighted) || (selected && !glow.selected) {
        RenderPass::NotRendered
    } else if transparent {
        RenderPass::ColorTransparent
    } else {
        RenderPass::ColorOpaque
    };

    let silhouette = if selected {
        RenderPass::SilhouetteSelected
    } else if highlighted {
        RenderPass::SilhouetteHighlighted
    } else if xrayed {
        RenderPass::SilhouetteXRayed
    } else {
        RenderPass::NotRendered
    };

    let edges = if selected {
        RenderPass::EdgesSelected
    } else if highlighted {
        RenderPass::EdgesHighlighted
    } else if xrayed {
        RenderPass::EdgesXRayed
    } else if edges && has_edges {
        if transparent {
            RenderPass::EdgesColorTransparent
        } else {
            RenderPass::EdgesColorOpaque
        }
    } else {
        RenderPass::NotRendered
    };

    let pick = if pickable {
        RenderPass::Pick
    } else {
        RenderPass::NotRendered
    };

    PassFlags {
        color,
        silhouette,
        edges,
        pick,
    }
}

/// Number of portions holding each flag, kept equal to the per-portion bits
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PortionCounts {
    pub portions: usize,
    pub visible: usize,
    pub culled: usize,
    pub pickable: usize,
    pub clippable: usize,
    pub xrayed: usize,
    pub highlighted: usize,
    pub selected: usize,
    pub edges: usize,
    pub transparent: usize,
}

impl PortionCounts {
    fn adjust(count: &mut usize, was: bool, is: bool) {
        match (was, is) {
            (false, true) => *count += 1,
            (true, false) => *count -= 1,
            _ => {}
        }
    }

    /// Account for one portion moving from `old` to `new`
    pub fn apply(&mut self, old: EntityFlags, new: EntityFlags) {
        let pairs: [(&mut usize, EntityFlags); 9] = [
            (&mut self.visible, EntityFlags::VISIBLE),
            (&mut self.culled, EntityFlags::CULLED),
            (&mut self.pickable, EntityFlags::PICKABLE),
            (&mut self.clippable, EntityFlags::CLIPPABLE),
            (&mut self.xrayed, EntityFlags::XRAYED),
            (&mut self.highlighted, EntityFlags::HIGHLIGHTED),
            (&mut self.selected, EntityFlags::SELECTED),
            (&mut self.edges, EntityFlags::EDGES),
            (&mut self.transparent, EntityFlags::TRANSPARENT),
        ];
        for (count, flag) in pairs {
            Self::adjust(count, old.contains(flag), new.contains(flag));
        }
    }

    pub fn all_culled(&self) -> bool {
        self.portions > 0 && self.culled == self.portions
    }

    /// True when no portion can show up in any pass
    pub fn nothing_visible(&self) -> bool {
        self.all_culled() || self.visible == 0
    }

    /// Recount from scratch
    pub fn from_flags<'a>(flags: impl IntoIterator<Item = &'a EntityFlags>) -> PortionCounts {
        let mut counts = PortionCounts::default();
        for f in flags {
            counts.portions += 1;
            counts.apply(EntityFlags::NONE, *f);
        }
        counts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_selected_visible_flags() {
        let flags = EntityFlags::VISIBLE | EntityFlags::SELECTED | EntityFlags::PICKABLE;
        let result = col_silh_edge_pick_flags(flags, false, true, GlowThrough::default());
        assert_eq!(result.color, RenderPass::ColorOpaque);
        assert_eq!(result.silhouette, RenderPass::SilhouetteSelected);
        assert_eq!(result.edges, RenderPass::EdgesSelected);
        assert_eq!(result.pick, RenderPass::Pick);

        // Pure: identical inputs give identical outputs
        let again = col_silh_edge_pick_flags(flags, false, true, GlowThrough::default());
        assert_eq!(result, again);
    }

    #[test]
    fn test_selected_without_glow_through_hides_color() {
        let flags = EntityFlags::VISIBLE | EntityFlags::SELECTED;
        let glow = GlowThrough {
            highlighted: true,
            selected: false,
        };
        let result = col_silh_edge_pick_flags(flags, false, true, glow);
        assert_eq!(result.color, RenderPass::NotRendered);
        assert_eq!(result.silhouette, RenderPass::SilhouetteSelected);
        assert_eq!(result.pick, RenderPass::NotRendered);
    }

    #[test]
    fn test_xrayed_and_transparent() {
        let xrayed = EntityFlags::VISIBLE | EntityFlags::XRAYED;
        let result = col_silh_edge_pick_flags(xrayed, false, true, GlowThrough::default());
        assert_eq!(result.color, RenderPass::NotRendered);
        assert_eq!(result.silhouette, RenderPass::SilhouetteXRayed);
        assert_eq!(result.edges, RenderPass::EdgesXRayed);

        let edged = EntityFlags::VISIBLE | EntityFlags::EDGES;
        let result = col_silh_edge_pick_flags(edged, true, true, GlowThrough::default());
        assert_eq!(result.color, RenderPass::ColorTransparent);
        assert_eq!(result.edges, RenderPass::EdgesColorTransparent);

        // No edge geometry means no edge pass
        let result = col_silh_edge_pick_flags(edged, true, false, GlowThrough::default());
        assert_eq!(result.edges, RenderPass::NotRendered);
    }

    #[test]
    fn test_culled_renders_nothing() {
        let flags = EntityFlags::VISIBLE | EntityFlags::CULLED | EntityFlags::PICKABLE;
        let result = col_silh_edge_pick_flags(flags, false, true, GlowThrough::default());
        assert_eq!(result.pack(false), 0);
    }

    #[test]
    fn test_pack_layout() {
        let flags = PassFlags {
            color: RenderPass::ColorTransparent,
            silhouette: RenderPass::SilhouetteXRayed,
            edges: RenderPass::EdgesSelected,
            pick: RenderPass::Pick,
        };
        assert_eq!(flags.pack(true), 2 | 5 << 4 | 9 << 8 | 11 << 12 | 1 << 16);
        assert_eq!(flags.pack(false) >> CLIPPABLE_SHIFT, 0);
    }

    #[test]
    fn test_counts_follow_transitions() {
        let mut counts = PortionCounts {
            portions: 2,
            ..Default::default()
        };
        let a = EntityFlags::VISIBLE | EntityFlags::PICKABLE;
        counts.apply(EntityFlags::NONE, a);
        counts.apply(EntityFlags::NONE, a);
        assert_eq!(counts.visible, 2);

        let b = a.with(EntityFlags::VISIBLE, false).with(EntityFlags::XRAYED, true);
        counts.apply(a, b);
        assert_eq!(counts.visible, 1);
        assert_eq!(counts.xrayed, 1);

        // Setting a flag that is already set changes nothing
        counts.apply(b, b);
        assert_eq!(counts.xrayed, 1);
        assert_eq!(counts, PortionCounts::from_flags(&[a, b]));
    }
}
