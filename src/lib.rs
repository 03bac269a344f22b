pub mod config;
pub mod error;
pub mod gl;
pub mod layer;
pub mod model;
pub mod renderer;
pub mod scene;

use crate::config::{ModelConfig, Primitive, SceneConfig};
use crate::error::RenderError;
use crate::layer::pick::Ray;
use crate::layer::portion::GeometryCfg;
use crate::layer::scratch::ScratchMemory;
use crate::model::{read_snap, render_frame, render_snap, MeshCfg, SceneModel, SnapRequest};
use crate::renderer::camera::{Camera, Projection};
use crate::renderer::shader::TextureSlot;
use crate::scene::{FrameContext, Scene, SnapMode};
use glam::{DMat4, DVec3};
use serde::Serialize;
use wasm_bindgen::prelude::*;
use wasm_bindgen::JsCast;
use web_sys::WebGl2RenderingContext;

const NOT_INITIALIZED: &str = "Renderer not initialized. Call init() first.";

/// Initialize panic hook for better error messages in browser console
#[wasm_bindgen]
pub fn init_panic_hook() {
    #[cfg(feature = "console_error_panic_hook")]
    console_error_panic_hook::set_once();
}

/// Surface hit returned to JS as JSON
#[derive(Serialize)]
struct PickResult<'a> {
    model: &'a str,
    mesh: usize,
    position: [f64; 3],
    normal: [f64; 3],
    distance: f64,
}

/// Snap pick returned to JS as JSON
#[derive(Serialize)]
struct SnapPickResult {
    position: [f64; 3],
    normal: [f32; 3],
    pick_color: [u8; 4],
    snapped: bool,
}

fn matrix_from(values: &[f64]) -> Result<DMat4, RenderError> {
    match values.len() {
        0 => Ok(DMat4::IDENTITY),
        16 => Ok(DMat4::from_cols_slice(values)),
        n => Err(RenderError::InvalidConfig(format!(
            "matrix needs 16 column-major values, got {}",
            n
        ))),
    }
}

fn vec3_from(values: &[f64]) -> Result<DVec3, RenderError> {
    match values {
        [x, y, z] => Ok(DVec3::new(*x, *y, *z)),
        _ => Err(RenderError::InvalidConfig(format!(
            "expected 3 components, got {}",
            values.len()
        ))),
    }
}

/// RGB or RGBA bytes
fn color_from(values: &[u8]) -> Result<([u8; 3], u8), RenderError> {
    match values {
        [r, g, b] => Ok(([*r, *g, *b], 255)),
        [r, g, b, a] => Ok(([*r, *g, *b], *a)),
        _ => Err(RenderError::InvalidConfig(format!(
            "color needs 3 or 4 bytes, got {}",
            values.len()
        ))),
    }
}

fn canvas_size(gl: &WebGl2RenderingContext) -> Result<(u32, u32), JsValue> {
    let canvas = gl
        .canvas()
        .ok_or_else(|| JsValue::from_str("No canvas"))?
        .dyn_into::<web_sys::HtmlCanvasElement>()?;
    Ok((canvas.width(), canvas.height()))
}

/// Stateful scene renderer driven from JS
#[wasm_bindgen]
#[derive(Default)]
pub struct SceneRenderer {
    gl: Option<WebGl2RenderingContext>,
    scene: Option<Scene<WebGl2RenderingContext>>,
    models: Vec<SceneModel<WebGl2RenderingContext>>,
    camera: Camera,
    frame: FrameContext,
    scratch: ScratchMemory,
}

impl SceneRenderer {
    fn gl(&self) -> Result<&WebGl2RenderingContext, JsValue> {
        self.gl.as_ref().ok_or_else(|| JsValue::from_str(NOT_INITIALIZED))
    }

    fn model_index(&self, model_id: &str) -> Result<usize, JsValue> {
        self.models
            .iter()
            .position(|m| m.id() == model_id)
            .ok_or_else(|| JsValue::from_str(&format!("Unknown model: {}", model_id)))
    }

    fn gl_and_scene(
        &mut self,
    ) -> Result<(&WebGl2RenderingContext, &mut Scene<WebGl2RenderingContext>), JsValue> {
        let gl = self
            .gl
            .as_ref()
            .ok_or_else(|| JsValue::from_str(NOT_INITIALIZED))?;
        let scene = self
            .scene
            .as_mut()
            .ok_or_else(|| JsValue::from_str(NOT_INITIALIZED))?;
        Ok((gl, scene))
    }

    fn with_model<R>(
        &mut self,
        model_id: &str,
        f: impl FnOnce(&WebGl2RenderingContext, &mut SceneModel<WebGl2RenderingContext>) -> error::Result<R>,
    ) -> Result<R, JsValue> {
        let index = self.model_index(model_id)?;
        let gl = self
            .gl
            .as_ref()
            .ok_or_else(|| JsValue::from_str(NOT_INITIALIZED))?;
        Ok(f(gl, &mut self.models[index])?)
    }
}

#[wasm_bindgen]
impl SceneRenderer {
    /// Create a new SceneRenderer instance
    #[wasm_bindgen(constructor)]
    pub fn new() -> SceneRenderer {
        SceneRenderer::default()
    }

    /// Initialize with WebGL 2.0 context
    ///
    /// # Returns
    /// * `"init_done"` signal on success
    pub fn init(&mut self, gl: WebGl2RenderingContext) -> Result<String, JsValue> {
        let (width, height) = canvas_size(&gl)?;
        self.camera.set_viewport(width, height);
        self.frame.viewport_size = [width as f32, height as f32];
        self.scene = Some(Scene::new(SceneConfig::default()));
        self.gl = Some(gl);
        Ok("init_done".to_string())
    }

    /// Replace the scene configuration (JSON); renderers it invalidates are
    /// rebuilt
    pub fn set_scene_config(&mut self, json: &str) -> Result<String, JsValue> {
        let config = SceneConfig::from_json(json)?;
        let gl = self
            .gl
            .as_ref()
            .ok_or_else(|| JsValue::from_str(NOT_INITIALIZED))?;
        let scene = self
            .scene
            .as_mut()
            .ok_or_else(|| JsValue::from_str(NOT_INITIALIZED))?;
        model::set_scene_config(gl, scene, &mut self.models, config)?;
        Ok("config_done".to_string())
    }

    /// Create an empty model
    ///
    /// # Arguments
    /// * `model_id` - Unique model id
    /// * `json` - Model configuration, empty for defaults
    pub fn create_model(&mut self, model_id: &str, json: &str) -> Result<String, JsValue> {
        if self.model_index(model_id).is_ok() {
            return Err(JsValue::from_str(&format!("Model exists: {}", model_id)));
        }
        let config = if json.trim().is_empty() {
            ModelConfig::default()
        } else {
            ModelConfig::from_json(json)?
        };
        let scene = self
            .scene
            .as_ref()
            .ok_or_else(|| JsValue::from_str(NOT_INITIALIZED))?;
        self.models.push(SceneModel::new(
            model_id,
            config,
            scene.config(),
            &self.scratch,
        ));
        Ok("model_done".to_string())
    }

    /// Add a batched mesh to a model
    ///
    /// # Arguments
    /// * `primitive` - `"points"`, `"lines"`, `"solid"` or `"surface"`
    /// * `positions` - Flat xyz array
    /// * `normals` - Flat xyz array, may be empty
    /// * `indices` - May be empty for sequential vertices
    /// * `matrix` - Column-major 4x4, empty for identity
    /// * `color` - RGB or RGBA bytes
    ///
    /// # Returns
    /// * Mesh id within the model
    #[allow(clippy::too_many_arguments)]
    pub fn create_mesh(
        &mut self,
        model_id: &str,
        primitive: &str,
        positions: &[f64],
        normals: &[f32],
        indices: &[u32],
        matrix: &[f64],
        color: &[u8],
    ) -> Result<u32, JsValue> {
        let primitive: Primitive = primitive.parse()?;
        let matrix = matrix_from(matrix)?;
        let (color, opacity) = color_from(color)?;
        let index = self.model_index(model_id)?;
        let mesh = self.models[index].create_mesh(&MeshCfg {
            primitive,
            geometry: Some(GeometryCfg {
                positions,
                normals,
                indices,
                ..Default::default()
            }),
            matrix,
            color,
            opacity,
            ..Default::default()
        })?;
        Ok(mesh as u32)
    }

    /// Add an instance of a shared geometry. The first instance of a
    /// geometry id carries its arrays; later ones may pass empty arrays.
    #[allow(clippy::too_many_arguments)]
    pub fn create_instance(
        &mut self,
        model_id: &str,
        geometry_id: &str,
        primitive: &str,
        positions: &[f64],
        normals: &[f32],
        indices: &[u32],
        matrix: &[f64],
        color: &[u8],
    ) -> Result<u32, JsValue> {
        let primitive: Primitive = primitive.parse()?;
        let matrix = matrix_from(matrix)?;
        let (color, opacity) = color_from(color)?;
        let index = self.model_index(model_id)?;
        let geometry = (!positions.is_empty()).then(|| GeometryCfg {
            positions,
            normals,
            indices,
            ..Default::default()
        });
        let mesh = self.models[index].create_mesh(&MeshCfg {
            primitive,
            geometry,
            geometry_id: Some(geometry_id.to_string()),
            matrix,
            color,
            opacity,
            ..Default::default()
        })?;
        Ok(mesh as u32)
    }

    /// Add a batched mesh sampling a texture set. Upload the set's maps with
    /// `set_texture` first; the maps present now decide how it is shaded.
    #[allow(clippy::too_many_arguments)]
    pub fn create_textured_mesh(
        &mut self,
        model_id: &str,
        primitive: &str,
        positions: &[f64],
        normals: &[f32],
        uvs: &[f32],
        indices: &[u32],
        matrix: &[f64],
        color: &[u8],
        texture_set: u32,
    ) -> Result<u32, JsValue> {
        let primitive: Primitive = primitive.parse()?;
        let matrix = matrix_from(matrix)?;
        let (color, opacity) = color_from(color)?;
        let texture_set = self
            .scene
            .as_ref()
            .ok_or_else(|| JsValue::from_str(NOT_INITIALIZED))?
            .state
            .texture_set_ref(texture_set as usize)
            .ok_or_else(|| JsValue::from_str(&format!("Unknown texture set: {}", texture_set)))?;
        let index = self.model_index(model_id)?;
        let mesh = self.models[index].create_mesh(&MeshCfg {
            primitive,
            geometry: Some(GeometryCfg {
                positions,
                normals,
                uvs,
                indices,
                ..Default::default()
            }),
            matrix,
            color,
            opacity,
            texture_set: Some(texture_set),
            ..Default::default()
        })?;
        Ok(mesh as u32)
    }

    /// Upload a model's meshes; no meshes can be added afterwards
    ///
    /// # Returns
    /// * `"finalize_done"` signal on success
    pub fn finalize_model(&mut self, model_id: &str) -> Result<String, JsValue> {
        self.with_model(model_id, |gl, model| model.finalize(gl))?;
        Ok("finalize_done".to_string())
    }

    pub fn set_visible(&mut self, model_id: &str, mesh: u32, on: bool) -> Result<(), JsValue> {
        self.with_model(model_id, |gl, model| model.set_visible(gl, mesh as usize, on))
    }

    pub fn set_highlighted(&mut self, model_id: &str, mesh: u32, on: bool) -> Result<(), JsValue> {
        self.with_model(model_id, |gl, model| model.set_highlighted(gl, mesh as usize, on))
    }

    pub fn set_selected(&mut self, model_id: &str, mesh: u32, on: bool) -> Result<(), JsValue> {
        self.with_model(model_id, |gl, model| model.set_selected(gl, mesh as usize, on))
    }

    pub fn set_xrayed(&mut self, model_id: &str, mesh: u32, on: bool) -> Result<(), JsValue> {
        self.with_model(model_id, |gl, model| model.set_xrayed(gl, mesh as usize, on))
    }

    pub fn set_edges(&mut self, model_id: &str, mesh: u32, on: bool) -> Result<(), JsValue> {
        self.with_model(model_id, |gl, model| model.set_edges(gl, mesh as usize, on))
    }

    pub fn set_pickable(&mut self, model_id: &str, mesh: u32, on: bool) -> Result<(), JsValue> {
        self.with_model(model_id, |gl, model| model.set_pickable(gl, mesh as usize, on))
    }

    pub fn set_culled(&mut self, model_id: &str, mesh: u32, on: bool) -> Result<(), JsValue> {
        self.with_model(model_id, |gl, model| model.set_culled(gl, mesh as usize, on))
    }

    /// RGB or RGBA bytes; alpha below 255 makes the mesh transparent
    pub fn set_color(&mut self, model_id: &str, mesh: u32, color: &[u8]) -> Result<(), JsValue> {
        let (rgb, opacity) = color_from(color)?;
        let rgba = color.len() == 4;
        self.with_model(model_id, |gl, model| {
            model.set_color(gl, mesh as usize, rgb)?;
            if rgba {
                model.set_opacity(gl, mesh as usize, opacity)?;
            }
            Ok(())
        })
    }

    pub fn set_opacity(&mut self, model_id: &str, mesh: u32, opacity: u8) -> Result<(), JsValue> {
        self.with_model(model_id, |gl, model| model.set_opacity(gl, mesh as usize, opacity))
    }

    /// Instance transform, column-major 4x4
    pub fn set_mesh_matrix(
        &mut self,
        model_id: &str,
        mesh: u32,
        matrix: &[f64],
    ) -> Result<(), JsValue> {
        let matrix = matrix_from(matrix)?;
        self.with_model(model_id, |gl, model| model.set_mesh_matrix(gl, mesh as usize, matrix))
    }

    /// Point the camera
    pub fn set_camera(&mut self, eye: &[f64], look: &[f64], up: &[f64]) -> Result<(), JsValue> {
        self.camera
            .look_at(vec3_from(eye)?, vec3_from(look)?, vec3_from(up)?);
        Ok(())
    }

    pub fn set_perspective(&mut self, fov_y_degrees: f64) {
        self.camera.set_projection(Projection::Perspective {
            fov_y: fov_y_degrees.to_radians(),
        });
    }

    pub fn set_ortho(&mut self, scale: f64) {
        self.camera.set_projection(Projection::Ortho { scale });
    }

    /// Draw one frame of every model
    ///
    /// # Returns
    /// * `"render_done"` signal on success
    pub fn render(&mut self) -> Result<String, JsValue> {
        let gl = self
            .gl
            .as_ref()
            .ok_or_else(|| JsValue::from_str(NOT_INITIALIZED))?;
        let scene = self
            .scene
            .as_mut()
            .ok_or_else(|| JsValue::from_str(NOT_INITIALIZED))?;
        let (width, height) = canvas_size(gl)?;
        gl.viewport(0, 0, width as i32, height as i32);
        gl.clear_color(0.0, 0.0, 0.0, 0.0);
        gl.clear(WebGl2RenderingContext::COLOR_BUFFER_BIT | WebGl2RenderingContext::DEPTH_BUFFER_BIT);
        render_frame(gl, scene, &mut self.models, &self.camera, &mut self.frame)?;
        Ok("render_done".to_string())
    }

    /// Upload one map of a texture set
    ///
    /// # Arguments
    /// * `slot` - `"color"`, `"metallic_roughness"`, `"emissive"` or `"occlusion"`
    /// * `pixels` - Tightly packed RGBA bytes, `width * height * 4` long
    pub fn set_texture(
        &mut self,
        texture_set: u32,
        slot: &str,
        width: u32,
        height: u32,
        pixels: &[u8],
    ) -> Result<(), JsValue> {
        let slot: TextureSlot = slot.parse()?;
        let (gl, scene) = self.gl_and_scene()?;
        scene.set_texture_image(gl, texture_set as usize, slot, width, height, pixels)?;
        Ok(())
    }

    /// Irradiance cube map, six RGBA faces of `size * size` in +X, -X, +Y,
    /// -Y, +Z, -Z order
    pub fn set_light_map(&mut self, size: u32, faces: &[u8]) -> Result<(), JsValue> {
        let (gl, scene) = self.gl_and_scene()?;
        scene.set_light_map(gl, size, faces)?;
        Ok(())
    }

    /// Reflection cube map, laid out like `set_light_map`
    pub fn set_reflection_map(&mut self, size: u32, faces: &[u8]) -> Result<(), JsValue> {
        let (gl, scene) = self.gl_and_scene()?;
        scene.set_reflection_map(gl, size, faces)?;
        Ok(())
    }

    /// Screen-space ambient occlusion, packed depth in RGBA bytes
    pub fn set_occlusion_image(
        &mut self,
        width: u32,
        height: u32,
        pixels: &[u8],
    ) -> Result<(), JsValue> {
        let (gl, scene) = self.gl_and_scene()?;
        scene.set_occlusion_image(gl, width, height, pixels)?;
        Ok(())
    }

    /// Snap to the vertex or edge nearest a canvas pixel, falling back to
    /// the surface under it
    ///
    /// # Returns
    /// * JSON `{position, normal, pick_color, snapped}`, or `undefined`
    ///   when nothing is under the pointer
    pub fn snap_pick(&mut self, x: f32, y: f32, edges: bool) -> Result<Option<String>, JsValue> {
        let (width, height) = canvas_size(self.gl()?)?;
        let request = SnapRequest {
            canvas_size: [width, height],
            pointer: [x, y],
            mode: if edges { SnapMode::Edge } else { SnapMode::Vertex },
        };
        let gl = self
            .gl
            .as_ref()
            .ok_or_else(|| JsValue::from_str(NOT_INITIALIZED))?;
        let scene = self
            .scene
            .as_mut()
            .ok_or_else(|| JsValue::from_str(NOT_INITIALIZED))?;
        render_snap(gl, scene, &mut self.models, &self.camera, &mut self.frame, &request)?;
        let Some(hit) = read_snap(gl, scene, &self.frame)? else {
            return Ok(None);
        };
        let result = SnapPickResult {
            position: hit.world_pos.to_array(),
            normal: hit.world_normal.to_array(),
            pick_color: hit.pick_color,
            snapped: hit.snapped,
        };
        let json = serde_json::to_string(&result).map_err(RenderError::from)?;
        Ok(Some(json))
    }

    /// Update the camera aspect when canvas dimensions change
    ///
    /// # Returns
    /// * `"resize_done"` signal on success
    pub fn resize(&mut self) -> Result<String, JsValue> {
        let (width, height) = canvas_size(self.gl()?)?;
        self.camera.set_viewport(width, height);
        self.frame.viewport_size = [width as f32, height as f32];
        Ok("resize_done".to_string())
    }

    /// Cast a world-space ray against retained geometry of every model
    ///
    /// # Returns
    /// * JSON `{model, mesh, position, normal, distance}` of the nearest
    ///   hit, or `undefined`
    pub fn pick_surface(&self, origin: &[f64], dir: &[f64]) -> Result<Option<String>, JsValue> {
        let ray = Ray::new(vec3_from(origin)?, vec3_from(dir)?);
        let nearest = self
            .models
            .iter()
            .filter_map(|model| model.pick_surface(&ray).map(|(mesh, hit)| (model, mesh, hit)))
            .min_by(|a, b| a.2.distance.total_cmp(&b.2.distance));
        let Some((model, mesh, hit)) = nearest else {
            return Ok(None);
        };
        let result = PickResult {
            model: model.id(),
            mesh,
            position: hit.world_pos.to_array(),
            normal: hit.world_normal.to_array(),
            distance: hit.distance,
        };
        let json = serde_json::to_string(&result).map_err(RenderError::from)?;
        Ok(Some(json))
    }

    /// World bounds of a model as `[min_x, min_y, min_z, max_x, max_y, max_z]`
    pub fn get_boundary(&self, model_id: &str) -> Result<Vec<f64>, JsValue> {
        let aabb = self.models[self.model_index(model_id)?].aabb();
        Ok([aabb.min.to_array(), aabb.max.to_array()].concat())
    }

    /// Remove a model and release its GPU buffers
    ///
    /// # Returns
    /// * `"remove_done"` signal on success
    pub fn remove_model(&mut self, model_id: &str) -> Result<String, JsValue> {
        let index = self.model_index(model_id)?;
        let gl = self
            .gl
            .as_ref()
            .ok_or_else(|| JsValue::from_str(NOT_INITIALIZED))?;
        let mut model = self.models.remove(index);
        model.destroy(gl);
        Ok("remove_done".to_string())
    }

    /// Remove every model and release cached programs
    ///
    /// # Returns
    /// * `"clear_done"` signal on success
    pub fn clear(&mut self) -> Result<String, JsValue> {
        let gl = self
            .gl
            .as_ref()
            .ok_or_else(|| JsValue::from_str(NOT_INITIALIZED))?;
        for model in &mut self.models {
            model.destroy(gl);
        }
        self.models.clear();
        if let Some(scene) = &mut self.scene {
            scene.destroy(gl);
        }
        Ok("clear_done".to_string())
    }
}
