use std::mem;

use nalgebra::{Point3, Reflection3, Unit, Vector3, Vector4};
use rayon::prelude::*;
use winit::dpi::PhysicalSize;

use crate::camera::Camera;
use crate::ember::ray::Ray;
use crate::ember::scene::{Scene, Sphere};
use crate::util;
use crate::vec4_to_rgba;

pub mod ray;
pub mod rng;
pub mod scene;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum RenderMode {
    /// Fixed directional light plus reflections, sky gradient on miss.
    DirectLight,
    /// Emissive materials only; a miss ends the path without a sky term.
    Emission,
}

pub struct Settings {
    pub should_accumulate: bool,
    pub mode: RenderMode,
    /// Draw scatter jitter from the host thread RNG instead of the
    /// deterministic per-pixel sequence. Non-reproducible frames.
    pub slow_random: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            should_accumulate: true,
            mode: RenderMode::DirectLight,
            slow_random: false,
        }
    }
}

pub struct Ember {
    size: PhysicalSize<u32>,
    final_image_data: Vec<u32>,
    path_acc: Vec<Vector4<f32>>,
    acc_counter: u32,
    pub settings: Settings,
}

impl Ember {
    const DIRECT_BOUNCE_LIMIT: u32 = 10;
    const EMISSION_BOUNCE_LIMIT: u32 = 5;

    /// Offset applied to bounce origins so a ray restarted on a surface
    /// does not immediately re-hit it.
    const SURFACE_OFFSET: f32 = 1.0e-4;

    pub fn new(viewport_size: PhysicalSize<u32>) -> Self {
        let pixel_count = (viewport_size.width * viewport_size.height) as usize;

        Self {
            size: viewport_size,
            final_image_data: vec![0; pixel_count],
            path_acc: vec![Vector4::zeros(); pixel_count],
            acc_counter: 1,
            settings: Settings::default(),
        }
    }

    /// Reallocates both pixel buffers. Keeps the accumulation history when
    /// the dimensions did not actually change.
    pub fn resize(&mut self, new_size: PhysicalSize<u32>) {
        if self.size == new_size {
            return;
        }

        let pixel_count = (new_size.width * new_size.height) as usize;
        self.size = new_size;
        self.final_image_data = vec![0; pixel_count];
        self.path_acc = vec![Vector4::zeros(); pixel_count];
    }

    /// Traces one sample for every pixel and republishes the averaged,
    /// packed image. With accumulation enabled each call adds one sample to
    /// the running mean; otherwise every call is a fresh single-sample frame.
    pub fn render(&mut self, scene: &Scene, camera: &Camera) {
        debug_assert!(
            scene
                .spheres
                .iter()
                .all(|sphere| sphere.material_index < scene.materials.len()),
            "sphere references a material outside the scene table"
        );

        let width = self.size.width as usize;
        if width == 0 || self.size.height == 0 {
            return;
        }

        if self.acc_counter == 1 {
            self.path_acc.fill(Vector4::zeros());
        }

        let per_pixel: fn(&Self, &Scene, &Camera, u32, u32) -> Vector4<f32> =
            match self.settings.mode {
                RenderMode::DirectLight => Self::per_pixel_direct,
                RenderMode::Emission => Self::per_pixel_emission,
            };
        let frame = self.acc_counter as f32;

        let mut path_acc = mem::take(&mut self.path_acc);
        let mut image_data = mem::take(&mut self.final_image_data);
        let renderer: &Ember = &*self;

        // Rows run in parallel; every task owns one accumulator row and one
        // image row, so no pixel slot is ever shared between workers.
        path_acc
            .par_chunks_mut(width)
            .zip(image_data.par_chunks_mut(width))
            .enumerate()
            .for_each(|(y, (acc_row, image_row))| {
                for x in 0..width {
                    let color = per_pixel(renderer, scene, camera, x as u32, y as u32);
                    acc_row[x] += color;
                    image_row[x] = vec4_to_rgba(&(acc_row[x] / frame));
                }
            });

        self.path_acc = path_acc;
        self.final_image_data = image_data;

        if self.settings.should_accumulate {
            self.acc_counter += 1;
        } else {
            self.acc_counter = 1;
        }
    }

    /// Discards the accumulation history; the next pass starts at frame 1.
    pub fn reset_counter(&mut self) {
        self.acc_counter = 1;
    }

    pub fn frame_index(&self) -> u32 {
        self.acc_counter
    }

    pub fn size(&self) -> PhysicalSize<u32> {
        self.size
    }

    /// The packed RGBA image of the last pass, row-major, red in the low byte.
    pub fn final_image_data(&self) -> &[u32] {
        &self.final_image_data
    }

    fn per_pixel_direct(&self, scene: &Scene, camera: &Camera, x: u32, y: u32) -> Vector4<f32> {
        let index = (y * self.size.width + x) as usize;
        let mut ray = Ray {
            origin: camera.position,
            direction: camera.rays[index],
        };

        let mut color = Vector3::zeros();
        let mut multiplier = 1.0;

        let mut seed = (x + y * self.size.width).wrapping_mul(self.acc_counter);
        let light_direction = Vector3::new(-1.0, -1.0, -1.0).normalize();

        for bounce in 0..Self::DIRECT_BOUNCE_LIMIT {
            seed = seed.wrapping_add(bounce);

            let Some(payload) = self.trace_ray(&ray, scene) else {
                // Vertical gradient; the blend factor runs 0.5..1.5 over the
                // full sweep, so the zenith extrapolates past the pale blue.
                let a = 0.5 * ray.direction.y + 1.0;
                let sky = Vector3::new(1.0, 1.0, 1.0) * (1.0 - a)
                    + Vector3::new(0.5, 0.7, 1.0) * a;
                color += sky * multiplier;
                break;
            };

            let intensity = payload.normal.dot(&-light_direction).max(0.0);
            let material = &scene.materials[payload.sphere.material_index];

            color += material.albedo * intensity * multiplier;
            multiplier *= 0.5;

            ray.origin = payload.position + payload.normal.as_ref() * Self::SURFACE_OFFSET;

            let jitter = if self.settings.slow_random {
                util::random_vec(-0.5..0.5)
            } else {
                rng::range_vector(&mut seed, -0.5..0.5)
            };
            let axis = Unit::new_normalize(payload.normal.as_ref() + material.roughness * jitter);
            Reflection3::new(axis, 0.0).reflect(ray.direction.as_mut_unchecked());
        }

        Vector4::new(color.x, color.y, color.z, 1.0)
    }

    fn per_pixel_emission(&self, scene: &Scene, camera: &Camera, x: u32, y: u32) -> Vector4<f32> {
        let index = (y * self.size.width + x) as usize;
        let mut ray = Ray {
            origin: camera.position,
            direction: camera.rays[index],
        };

        let mut light = Vector3::zeros();
        // Albedo product along the path. Emission below is added untinted.
        let mut contribution = Vector3::new(1.0, 1.0, 1.0);

        let mut seed = (x + y * self.size.width).wrapping_mul(self.acc_counter);

        for bounce in 0..Self::EMISSION_BOUNCE_LIMIT {
            seed = seed.wrapping_add(bounce);

            let Some(payload) = self.trace_ray(&ray, scene) else {
                break;
            };

            let material = &scene.materials[payload.sphere.material_index];
            contribution.component_mul_assign(&material.albedo);
            light += material.emission();

            ray.origin = payload.position + payload.normal.as_ref() * Self::SURFACE_OFFSET;

            let scatter = if self.settings.slow_random {
                util::random_unit_vec()
            } else {
                rng::unit_vector(&mut seed)
            };
            ray.direction = Unit::try_new(scatter.into_inner() + payload.normal.as_ref(), 1.0e-8)
                .unwrap_or(payload.normal);
        }

        Vector4::new(light.x, light.y, light.z, 1.0)
    }

    fn closest_hit<'a>(&self, ray: &Ray, distance: f32, sphere: &'a Sphere) -> HitPayload<'a> {
        let position = ray.at(distance);

        // The normal is the hit point seen from the sphere's center.
        let mut normal = Unit::new_unchecked((position - sphere.position).coords / sphere.radius);
        normal.renormalize_fast();

        HitPayload {
            distance,
            position,
            normal,
            sphere,
        }
    }

    pub fn trace_ray<'a>(&self, ray: &Ray, scene: &'a Scene) -> Option<HitPayload<'a>> {
        let mut closest: Option<(&Sphere, f32)> = None;

        for sphere in &scene.spheres {
            // Degenerate spheres never hit.
            if sphere.radius <= 0.0 {
                continue;
            }

            let origin = ray.origin - sphere.position;

            let a = ray.direction.magnitude_squared();
            let b = 2.0 * origin.coords.dot(&ray.direction);
            let c = origin.coords.magnitude_squared() - sphere.radius * sphere.radius;

            let discriminant = b * b - 4.0 * a * c;
            if discriminant < 0.0 {
                continue;
            }

            // Near root only; a hit behind or exactly on the origin is no hit.
            let distance = (-b - discriminant.sqrt()) / (2.0 * a);
            if distance <= 0.0 {
                continue;
            }

            if let Some((_, best_distance)) = closest {
                if distance < best_distance {
                    closest = Some((sphere, distance));
                }
            } else {
                closest = Some((sphere, distance));
            }
        }

        closest.map(|(sphere, distance)| self.closest_hit(ray, distance, sphere))
    }
}

/// What a traced ray learned about the surface it hit. Colors are resolved
/// later by the integrators, not here.
pub struct HitPayload<'a> {
    pub distance: f32,
    pub position: Point3<f32>,
    pub normal: Unit<Vector3<f32>>,
    pub sphere: &'a Sphere,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ember::scene::Material;

    fn single_sphere(material: Material) -> Scene {
        Scene {
            spheres: vec![Sphere::default()],
            materials: vec![material],
        }
    }

    fn camera_facing(position: Point3<f32>, direction: Vector3<f32>, pixels: usize) -> Camera {
        Camera::with_rays(position, vec![Unit::new_normalize(direction); pixels])
    }

    fn unpack(pixel: u32) -> [u8; 4] {
        [
            (pixel & 0xFF) as u8,
            ((pixel >> 8) & 0xFF) as u8,
            ((pixel >> 16) & 0xFF) as u8,
            (pixel >> 24) as u8,
        ]
    }

    fn max_channel_delta(first: &[u32], second: &[u32]) -> i32 {
        first
            .iter()
            .zip(second)
            .flat_map(|(a, b)| {
                unpack(*a)
                    .into_iter()
                    .zip(unpack(*b))
                    .map(|(a, b)| (a as i32 - b as i32).abs())
            })
            .max()
            .unwrap_or(0)
    }

    #[test]
    fn ray_pointing_away_misses() {
        let ember = Ember::new(PhysicalSize::new(1, 1));
        let scene = single_sphere(Material::default());
        let ray = Ray {
            origin: Point3::new(0.0, 0.0, 3.0),
            direction: Unit::new_normalize(Vector3::new(0.0, 0.0, 1.0)),
        };

        assert!(ember.trace_ray(&ray, &scene).is_none());
    }

    #[test]
    fn through_center_hit_faces_the_ray() {
        let ember = Ember::new(PhysicalSize::new(1, 1));
        let scene = single_sphere(Material::default());
        let ray = Ray {
            origin: Point3::new(0.0, 0.0, 3.0),
            direction: Unit::new_normalize(Vector3::new(0.0, 0.0, -1.0)),
        };

        let payload = ember.trace_ray(&ray, &scene).expect("head-on ray must hit");
        assert!((payload.distance - 2.0).abs() < 1.0e-5);
        assert!((payload.position - Point3::new(0.0, 0.0, 1.0)).magnitude() < 1.0e-5);
        // Entering through the center, the normal is the reversed direction.
        assert!((payload.normal.as_ref() + ray.direction.as_ref()).magnitude() < 1.0e-5);
    }

    #[test]
    fn overlapping_spheres_resolve_to_the_nearest() {
        let ember = Ember::new(PhysicalSize::new(1, 1));
        let ray = Ray {
            origin: Point3::new(0.0, 0.0, 5.0),
            direction: Unit::new_normalize(Vector3::new(0.0, 0.0, -1.0)),
        };

        for flipped in [false, true] {
            let mut spheres = vec![
                Sphere::default(),
                Sphere {
                    position: Vector3::new(0.0, 0.0, 1.0),
                    ..Default::default()
                },
            ];
            if flipped {
                spheres.reverse();
            }
            let scene = Scene {
                spheres,
                materials: vec![Material::default()],
            };

            let payload = ember.trace_ray(&ray, &scene).expect("must hit");
            assert!(
                (payload.distance - 3.0).abs() < 1.0e-5,
                "wrong sphere won with flipped = {flipped}"
            );
            assert_eq!(payload.sphere.position.z, 1.0);
        }
    }

    #[test]
    fn hit_position_lies_on_the_ray() {
        let ember = Ember::new(PhysicalSize::new(1, 1));
        let scene = Scene {
            spheres: vec![Sphere {
                position: Vector3::new(0.3, -0.4, 1.2),
                ..Default::default()
            }],
            materials: vec![Material::default()],
        };
        let ray = Ray {
            origin: Point3::new(0.1, 0.2, 5.3),
            direction: Unit::new_normalize(Vector3::new(0.05, -0.1, -1.0)),
        };

        let payload = ember.trace_ray(&ray, &scene).expect("must hit");
        // Bitwise, not approximate: the payload position is the ray itself
        // walked to the reported distance.
        assert_eq!(payload.position, ray.at(payload.distance));
    }

    #[test]
    fn degenerate_radii_never_hit() {
        let ember = Ember::new(PhysicalSize::new(1, 1));
        let ray = Ray {
            origin: Point3::new(0.0, 0.0, 3.0),
            direction: Unit::new_normalize(Vector3::new(0.0, 0.0, -1.0)),
        };

        for radius in [0.0, -1.0] {
            let scene = Scene {
                spheres: vec![Sphere {
                    radius,
                    ..Default::default()
                }],
                materials: vec![Material::default()],
            };
            assert!(ember.trace_ray(&ray, &scene).is_none());
        }
    }

    #[test]
    fn entry_exactly_on_the_surface_is_rejected() {
        let ember = Ember::new(PhysicalSize::new(1, 1));
        let scene = single_sphere(Material::default());
        // Near root lands at distance zero; the far root is never taken.
        let ray = Ray {
            origin: Point3::new(0.0, 0.0, 1.0),
            direction: Unit::new_normalize(Vector3::new(0.0, 0.0, -1.0)),
        };

        assert!(ember.trace_ray(&ray, &scene).is_none());
    }

    #[test]
    fn settings_default_to_accumulating_direct_light() {
        let settings = Settings::default();
        assert!(settings.should_accumulate);
        assert_eq!(settings.mode, RenderMode::DirectLight);
        assert!(!settings.slow_random);
    }

    #[test]
    fn non_accumulating_renders_are_bit_identical() {
        let mut ember = Ember::new(PhysicalSize::new(4, 4));
        ember.settings.should_accumulate = false;

        let scene = single_sphere(Material {
            albedo: Vector3::new(1.0, 0.0, 1.0),
            roughness: 0.5,
            ..Default::default()
        });
        let camera = camera_facing(Point3::new(0.0, 0.0, 3.0), Vector3::new(0.0, 0.0, -1.0), 16);

        ember.render(&scene, &camera);
        let first = ember.final_image_data().to_vec();
        assert_eq!(ember.frame_index(), 1);

        ember.render(&scene, &camera);
        assert_eq!(first.as_slice(), ember.final_image_data());
    }

    #[test]
    fn accumulation_settles_over_time() {
        let mut ember = Ember::new(PhysicalSize::new(2, 2));
        let scene = single_sphere(Material {
            albedo: Vector3::new(0.9, 0.4, 0.2),
            roughness: 0.7,
            ..Default::default()
        });
        let camera = camera_facing(Point3::new(0.0, 0.0, 3.0), Vector3::new(0.0, 0.0, -1.0), 4);

        ember.render(&scene, &camera);
        let mut previous = ember.final_image_data().to_vec();

        let mut deltas = vec![];
        for _ in 0..8 {
            ember.render(&scene, &camera);
            deltas.push(max_channel_delta(&previous, ember.final_image_data()));
            previous.copy_from_slice(ember.final_image_data());
        }

        assert_eq!(ember.frame_index(), 10);
        // The running mean moves by at most spread / frame, so a late window
        // of frames changes the image less than an early one.
        let early: i32 = deltas[..3].iter().sum();
        let late: i32 = deltas[5..].iter().sum();
        assert!(late <= early, "image still churning: {deltas:?}");
    }

    #[test]
    fn reset_discards_the_accumulation_history() {
        let scene = single_sphere(Material {
            albedo: Vector3::new(0.3, 0.8, 0.5),
            roughness: 0.6,
            ..Default::default()
        });
        let camera = camera_facing(Point3::new(0.0, 0.0, 3.0), Vector3::new(0.0, 0.0, -1.0), 4);

        let mut seasoned = Ember::new(PhysicalSize::new(2, 2));
        for _ in 0..3 {
            seasoned.render(&scene, &camera);
        }
        seasoned.reset_counter();
        assert_eq!(seasoned.frame_index(), 1);
        seasoned.render(&scene, &camera);

        let mut fresh = Ember::new(PhysicalSize::new(2, 2));
        fresh.render(&scene, &camera);

        assert_eq!(fresh.final_image_data(), seasoned.final_image_data());
    }

    #[test]
    fn resizing_to_the_same_size_keeps_everything() {
        let mut ember = Ember::new(PhysicalSize::new(4, 2));
        let scene = single_sphere(Material::default());
        let camera = camera_facing(Point3::new(0.0, 0.0, 3.0), Vector3::new(0.0, 0.0, -1.0), 8);

        ember.render(&scene, &camera);
        ember.render(&scene, &camera);
        assert_eq!(ember.frame_index(), 3);

        let buffer_identity = ember.final_image_data().as_ptr();
        ember.resize(PhysicalSize::new(4, 2));
        assert_eq!(ember.final_image_data().as_ptr(), buffer_identity);
        assert_eq!(ember.frame_index(), 3);

        ember.resize(PhysicalSize::new(3, 3));
        assert_eq!(ember.final_image_data().len(), 9);
    }

    #[test]
    fn empty_viewport_renders_as_a_no_op() {
        let mut ember = Ember::new(PhysicalSize::new(0, 0));
        let scene = single_sphere(Material::default());
        let camera = Camera::with_rays(Point3::origin(), vec![]);

        ember.render(&scene, &camera);
        assert!(ember.final_image_data().is_empty());
        assert_eq!(ember.frame_index(), 1);
    }

    #[test]
    fn emission_mode_miss_is_opaque_black() {
        let mut ember = Ember::new(PhysicalSize::new(1, 1));
        ember.settings.mode = RenderMode::Emission;
        ember.settings.should_accumulate = false;

        let scene = Scene {
            spheres: vec![],
            materials: vec![],
        };
        let camera = camera_facing(Point3::origin(), Vector3::new(0.0, 1.0, 0.0), 1);

        ember.render(&scene, &camera);
        assert_eq!(unpack(ember.final_image_data()[0]), [0, 0, 0, 255]);
    }

    #[test]
    fn emission_mode_collects_emitted_light() {
        let mut ember = Ember::new(PhysicalSize::new(1, 1));
        ember.settings.mode = RenderMode::Emission;
        ember.settings.should_accumulate = false;

        let scene = single_sphere(Material {
            albedo: Vector3::new(0.8, 0.8, 0.8),
            roughness: 1.0,
            emission_color: Vector3::new(1.0, 0.5, 0.25),
            emission_power: 2.0,
        });
        let camera = camera_facing(Point3::new(0.0, 0.0, 3.0), Vector3::new(0.0, 0.0, -1.0), 1);

        ember.render(&scene, &camera);
        // One hit collects (2.0, 1.0, 0.5); every scatter leaves the lone
        // sphere, so no second hit can add more.
        assert_eq!(unpack(ember.final_image_data()[0]), [255, 255, 127, 255]);
    }

    #[test]
    fn direct_mode_shades_a_head_on_sphere() {
        let mut ember = Ember::new(PhysicalSize::new(1, 1));
        ember.settings.should_accumulate = false;

        let scene = single_sphere(Material {
            albedo: Vector3::new(1.0, 0.0, 0.0),
            roughness: 0.0,
            ..Default::default()
        });
        let camera = camera_facing(Point3::new(0.0, 0.0, 3.0), Vector3::new(0.0, 0.0, -1.0), 1);

        ember.render(&scene, &camera);

        // Bounce 1: normal (0,0,1), Lambert term 1/sqrt(3), full multiplier.
        // Bounce 2: the mirror ray (0,0,1) misses and adds half the level sky.
        let intensity = 1.0 / 3.0_f32.sqrt();
        let expected = Vector4::new(intensity + 0.5 * 0.5, 0.7 * 0.5, 1.0 * 0.5, 1.0);
        assert_eq!(ember.final_image_data()[0], crate::vec4_to_rgba(&expected));

        let [r, g, b, a] = unpack(ember.final_image_data()[0]);
        assert!(r > 200, "lit red channel too dim: {r}");
        assert!(g < r && b < r);
        assert_eq!(a, 255);
    }

    #[test]
    fn direct_mode_miss_is_the_unattenuated_sky() {
        let mut ember = Ember::new(PhysicalSize::new(1, 1));
        ember.settings.should_accumulate = false;

        let scene = Scene {
            spheres: vec![],
            materials: vec![],
        };
        let camera = camera_facing(Point3::origin(), Vector3::new(0.0, 1.0, 0.0), 1);

        ember.render(&scene, &camera);
        // Straight up: a = 1.5, sky = (0.25, 0.55, 1.0), multiplier still 1.
        assert_eq!(unpack(ember.final_image_data()[0]), [63, 140, 255, 255]);
    }
}
