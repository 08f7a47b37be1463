use nalgebra::{Point3, Unit, Vector3};

/// A ray in world space, rebuilt fresh for every bounce.
pub struct Ray {
    pub origin: Point3<f32>,
    pub direction: Unit<Vector3<f32>>,
}

impl Ray {
    /// Point reached after travelling `distance` along the ray.
    pub fn at(&self, distance: f32) -> Point3<f32> {
        self.origin + self.direction.as_ref() * distance
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn at_walks_along_the_direction() {
        let ray = Ray {
            origin: Point3::new(1.0, 0.0, 0.0),
            direction: Unit::new_normalize(Vector3::new(0.0, 0.0, -2.0)),
        };

        assert_eq!(ray.at(3.0), Point3::new(1.0, 0.0, -3.0));
    }
}
