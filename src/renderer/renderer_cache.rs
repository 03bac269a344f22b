use crate::config::{LayerType, Primitive};
use crate::gl::GlContext;
use crate::renderer::layer_renderer::LayerRenderer;
use crate::renderer::techniques::{Instantiation, Technique};
use crate::scene::SceneRenderState;
use log::{debug, info};
use std::collections::HashMap;

/// Shape of the geometry a renderer set is built for; layers with equal keys
/// share programs
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct RendererKey {
    pub layer_type: LayerType,
    pub primitive: Primitive,
    pub sao: bool,
    /// Layer carries UVs, metallic-roughness and a full texture set
    pub pbr: bool,
    /// Layer carries UVs and a color texture
    pub color_texture: bool,
    pub has_normals: bool,
}

/// Scene-owned renderer sets keyed by geometry shape
pub struct RendererCache<G: GlContext> {
    entries: HashMap<RendererKey, HashMap<Technique, LayerRenderer<G>>>,
    next_id: u64,
}

impl<G: GlContext> Default for RendererCache<G> {
    fn default() -> Self {
        RendererCache {
            entries: HashMap::new(),
            next_id: 1,
        }
    }
}

impl<G: GlContext> RendererCache<G> {
    pub fn new() -> RendererCache<G> {
        RendererCache::default()
    }

    fn build(
        gl: &G,
        next_id: &mut u64,
        scene: &SceneRenderState<G>,
        key: &RendererKey,
        technique: Technique,
    ) -> LayerRenderer<G> {
        let id = *next_id;
        *next_id += 1;
        LayerRenderer::new(gl, id, scene, key, technique)
    }

    fn build_eager(
        gl: &G,
        next_id: &mut u64,
        scene: &SceneRenderState<G>,
        key: &RendererKey,
        set: &mut HashMap<Technique, LayerRenderer<G>>,
    ) {
        for technique in Technique::eager_for(key) {
            if !set.contains_key(&technique) {
                let renderer = Self::build(gl, next_id, scene, key, technique);
                set.insert(technique, renderer);
            }
        }
    }

    /// Make sure the eager set for `key` exists
    pub fn ensure(&mut self, gl: &G, scene: &SceneRenderState<G>, key: &RendererKey) {
        let next_id = &mut self.next_id;
        self.entries.entry(*key).or_insert_with(|| {
            info!(target: "renderer_cache", "new renderer set for {:?}", key);
            let mut set = HashMap::new();
            Self::build_eager(gl, next_id, scene, key, &mut set);
            set
        });
    }

    /// Renderer for `technique` on geometry shaped like `key`. Eager
    /// techniques come with the entry, lazy ones are built on first request.
    pub fn renderer(
        &mut self,
        gl: &G,
        scene: &SceneRenderState<G>,
        key: &RendererKey,
        technique: Technique,
    ) -> &LayerRenderer<G> {
        self.ensure(gl, scene, key);
        let next_id = &mut self.next_id;
        let set = self.entries.entry(*key).or_default();
        set.entry(technique).or_insert_with(|| {
            if technique.instantiation() == Instantiation::Lazy {
                debug!(target: "renderer_cache", "lazy build of {:?} for {:?}", technique, key);
            }
            Self::build(gl, next_id, scene, key, technique)
        })
    }

    /// Already-built renderer, without building anything
    pub fn get(&self, key: &RendererKey, technique: Technique) -> Option<&LayerRenderer<G>> {
        self.entries.get(key)?.get(&technique)
    }

    /// Rebuild renderers the scene invalidated, or all of them with `force`.
    /// Eager renderers are rebuilt immediately; lazy ones are dropped and
    /// rebuilt on next use.
    pub fn revalidate(&mut self, gl: &G, scene: &SceneRenderState<G>, force: bool) {
        let mut rebuilt = 0;
        for (key, set) in self.entries.iter_mut() {
            let stale: Vec<Technique> = set
                .iter()
                .filter(|(_, renderer)| force || !renderer.is_valid(scene))
                .map(|(technique, _)| *technique)
                .collect();
            for technique in stale {
                if let Some(renderer) = set.remove(&technique) {
                    renderer.destroy(gl);
                }
                rebuilt += 1;
            }
            Self::build_eager(gl, &mut self.next_id, scene, key, set);
        }
        if rebuilt > 0 {
            info!(target: "renderer_cache", "invalidated {} renderers", rebuilt);
        }
    }

    pub fn renderer_count(&self) -> usize {
        self.entries.values().map(HashMap::len).sum()
    }

    pub fn key_count(&self) -> usize {
        self.entries.len()
    }

    /// Release every program
    pub fn destroy(&mut self, gl: &G) {
        for (_, set) in self.entries.drain() {
            for (_, renderer) in set {
                renderer.destroy(gl);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SceneConfig;
    use crate::gl::recording::RecordingContext;

    fn key() -> RendererKey {
        RendererKey {
            layer_type: LayerType::Batching,
            primitive: Primitive::Solid,
            sao: false,
            pbr: false,
            color_texture: false,
            has_normals: true,
        }
    }

    #[test]
    fn test_same_key_returns_same_renderer() {
        let gl = RecordingContext::new();
        let scene = SceneRenderState::new(SceneConfig::default());
        let mut cache = RendererCache::new();

        let technique = Technique::Color {
            lighting: true,
            sao: false,
        };
        let first = cache.renderer(&gl, &scene, &key(), technique).id();
        let built = gl.state.borrow().programs_created;
        let second = cache.renderer(&gl, &scene, &key(), technique).id();
        assert_eq!(first, second);
        assert_eq!(gl.state.borrow().programs_created, built);
        assert_eq!(cache.key_count(), 1);
    }

    #[test]
    fn test_eager_set_built_with_entry() {
        let gl = RecordingContext::new();
        let scene = SceneRenderState::new(SceneConfig::default());
        let mut cache = RendererCache::new();
        cache.ensure(&gl, &scene, &key());

        assert!(cache.get(&key(), Technique::Silhouette).is_some());
        assert!(cache.get(&key(), Technique::PickMesh).is_some());
        assert!(cache.get(&key(), Technique::PickNormals { flat: false }).is_some());
        assert!(cache.get(&key(), Technique::Depth).is_none());
        assert_eq!(cache.renderer_count(), Technique::eager_for(&key()).len());
    }

    #[test]
    fn test_section_plane_change_invalidates() {
        let gl = RecordingContext::new();
        let mut scene = SceneRenderState::new(SceneConfig::default());
        let mut cache = RendererCache::new();
        let technique = Technique::Color {
            lighting: true,
            sao: false,
        };
        let before = cache.renderer(&gl, &scene, &key(), technique).id();
        let silhouette_before = cache.get(&key(), Technique::Silhouette).map(|r| r.id());

        // Unrelated change keeps every program
        scene.config.edge_material.edge_alpha = 0.3;
        cache.revalidate(&gl, &scene, false);
        assert_eq!(cache.get(&key(), technique).map(|r| r.id()), Some(before));

        scene.config.section_planes.push(Default::default());
        cache.revalidate(&gl, &scene, false);
        // Lazy renderer dropped until next use, eager one rebuilt
        assert!(cache.get(&key(), technique).is_none());
        let silhouette_after = cache.get(&key(), Technique::Silhouette).map(|r| r.id());
        assert!(silhouette_after.is_some());
        assert_ne!(silhouette_before, silhouette_after);

        let after = cache.renderer(&gl, &scene, &key(), technique).id();
        assert_ne!(before, after);
        assert!(gl.state.borrow().programs_deleted > 0);
    }

    #[test]
    fn test_destroy_releases_programs() {
        let gl = RecordingContext::new();
        let scene = SceneRenderState::new(SceneConfig::default());
        let mut cache = RendererCache::new();
        cache.ensure(&gl, &scene, &key());
        let count = cache.renderer_count();
        cache.destroy(&gl);
        assert_eq!(cache.renderer_count(), 0);
        assert_eq!(gl.state.borrow().programs_deleted, count);
    }
}
