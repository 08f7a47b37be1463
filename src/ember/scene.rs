use nalgebra::Vector3;

pub struct Scene {
    pub spheres: Vec<Sphere>,
    pub materials: Vec<Material>,
}

pub struct Sphere {
    pub position: Vector3<f32>,
    pub radius: f32,
    /// Index into `Scene::materials`. Must be in range for every sphere.
    pub material_index: usize,
}

impl Default for Sphere {
    fn default() -> Self {
        Self {
            position: Vector3::zeros(),
            radius: 1.0,
            material_index: 0,
        }
    }
}

pub struct Material {
    pub albedo: Vector3<f32>,
    /// 0.0 = mirror reflection, 1.0 = fully scattered.
    pub roughness: f32,
    pub emission_color: Vector3<f32>,
    pub emission_power: f32,
}

impl Material {
    /// Radiance emitted by a surface with this material.
    pub fn emission(&self) -> Vector3<f32> {
        self.emission_color * self.emission_power
    }
}

impl Default for Material {
    fn default() -> Self {
        Self {
            albedo: Vector3::new(1.0, 1.0, 1.0),
            roughness: 1.0,
            emission_color: Vector3::zeros(),
            emission_power: 0.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn emission_scales_color_by_power() {
        let material = Material {
            emission_color: Vector3::new(0.8, 0.5, 0.2),
            emission_power: 2.0,
            ..Default::default()
        };

        let emission = material.emission();
        assert!((emission.x - 1.6).abs() < 1.0e-6);
        assert!((emission.y - 1.0).abs() < 1.0e-6);
        assert!((emission.z - 0.4).abs() < 1.0e-6);
    }

    #[test]
    fn default_material_emits_nothing() {
        assert_eq!(Material::default().emission(), Vector3::zeros());
    }

    #[test]
    fn position_components_iterate_in_axis_order() {
        let mut sphere = Sphere::default();
        for (step, value) in (1..=3).zip(sphere.position.iter_mut()) {
            *value = step as f32;
        }

        assert_eq!(sphere.position, Vector3::new(1.0, 2.0, 3.0));
    }
}
