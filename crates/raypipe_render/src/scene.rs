//! Scene description loaded from JSON.
//!
//! ```json
//! {
//!   "modifiers": [
//!     { "name": "sun", "type": "light", "color": [100, 100, 100] },
//!     { "name": "paint", "type": "plastic", "color": [0.5, 0.5, 0.5] }
//!   ],
//!   "spheres": [
//!     { "name": "sun_disk", "modifier": "sun", "center": [0, 100, 0], "radius": 5 },
//!     { "name": "ball", "modifier": "paint", "center": [0, 0, -3], "radius": 1 }
//!   ],
//!   "ambient": [0.01, 0.01, 0.01]
//! }
//! ```

use std::collections::HashMap;
use std::path::Path;

use raypipe_math::{Color, DVec3};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::material::Material;
use crate::sphere::Sphere;

const VOID: &str = "void";

/// Errors that can occur while loading a scene.
#[derive(Error, Debug)]
pub enum SceneError {
    #[error("cannot read scene '{path}': {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("invalid scene: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("sphere '{sphere}' uses undefined modifier '{modifier}'")]
    UndefinedModifier { sphere: String, modifier: String },

    #[error("modifier '{0}' defined twice")]
    DuplicateModifier(String),

    #[error("sphere '{0}' has a non-positive radius")]
    BadRadius(String),
}

/// A named modifier as written in the scene file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModifierDef {
    pub name: String,
    #[serde(flatten)]
    pub material: Material,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SphereDef {
    pub name: String,
    /// Modifier name, or `void`
    pub modifier: String,
    pub center: DVec3,
    pub radius: f64,
}

/// Scene file contents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SceneDescription {
    #[serde(default)]
    pub modifiers: Vec<ModifierDef>,
    #[serde(default)]
    pub spheres: Vec<SphereDef>,
    /// Constant indirect light reaching diffuse surfaces
    #[serde(default)]
    pub ambient: Color,
    /// Value of rays that hit nothing
    #[serde(default)]
    pub background: Color,
    #[serde(default = "default_max_depth")]
    pub max_depth: u32,
    /// Rays whose weight drops below this are not spawned
    #[serde(default = "default_min_weight")]
    pub min_weight: f64,
}

fn default_max_depth() -> u32 {
    6
}

fn default_min_weight() -> f64 {
    1e-3
}

/// Resolved scene ready for evaluation.
#[derive(Debug, Clone)]
pub struct Scene {
    pub modifiers: Vec<(String, Material)>,
    pub spheres: Vec<Sphere>,
    /// Indices of spheres whose modifier is a light
    pub lights: Vec<usize>,
    pub ambient: Color,
    pub background: Color,
    pub max_depth: u32,
    pub min_weight: f64,
}

impl Scene {
    /// Load a scene from a JSON file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, SceneError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| SceneError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json(&text)
    }

    pub fn from_json(text: &str) -> Result<Self, SceneError> {
        let description: SceneDescription = serde_json::from_str(text)?;
        Self::from_description(description)
    }

    pub fn from_description(description: SceneDescription) -> Result<Self, SceneError> {
        let mut by_name = HashMap::new();
        for (index, def) in description.modifiers.iter().enumerate() {
            if by_name.insert(def.name.clone(), index).is_some() || def.name == VOID {
                return Err(SceneError::DuplicateModifier(def.name.clone()));
            }
        }

        let mut spheres = Vec::with_capacity(description.spheres.len());
        for def in description.spheres {
            if def.radius <= 0.0 {
                return Err(SceneError::BadRadius(def.name));
            }
            let modifier = if def.modifier == VOID {
                None
            } else {
                let index = by_name.get(&def.modifier).copied().ok_or_else(|| {
                    SceneError::UndefinedModifier {
                        sphere: def.name.clone(),
                        modifier: def.modifier.clone(),
                    }
                })?;
                Some(index)
            };
            spheres.push(Sphere::new(def.name, def.center, def.radius, modifier));
        }

        let modifiers: Vec<(String, Material)> = description
            .modifiers
            .into_iter()
            .map(|def| (def.name, def.material))
            .collect();
        let lights = spheres
            .iter()
            .enumerate()
            .filter(|(_, s)| s.modifier.is_some_and(|m| modifiers[m].1.is_light()))
            .map(|(i, _)| i)
            .collect::<Vec<_>>();

        log::info!(
            "loaded scene with {} sphere(s), {} modifier(s), {} light(s)",
            spheres.len(),
            modifiers.len(),
            lights.len()
        );

        Ok(Self {
            modifiers,
            spheres,
            lights,
            ambient: description.ambient,
            background: description.background,
            max_depth: description.max_depth,
            min_weight: description.min_weight,
        })
    }

    /// Modifier name and behavior of a sphere, `None` for void.
    pub fn modifier_of(&self, sphere: usize) -> Option<&(String, Material)> {
        self.spheres[sphere].modifier.map(|m| &self.modifiers[m])
    }
}
