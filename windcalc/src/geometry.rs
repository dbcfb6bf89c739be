use serde::Serialize;

/// Minimal angular difference between a wind direction and a runway heading,
/// always in `[0, 180]` degrees.
pub fn angle_between(wind_dir: f64, runway_heading: f64) -> f64 {
    let delta = (wind_dir - runway_heading).rem_euclid(360.0);
    delta.min(360.0 - delta)
}

/// Wind component perpendicular to the runway, in the wind's speed unit.
pub fn crosswind_component(speed: f64, angle_deg: f64) -> f64 {
    (speed * angle_deg.to_radians().sin()).abs()
}

/// Wind component along the runway; negative means tailwind.
pub fn headwind_component(speed: f64, angle_deg: f64) -> f64 {
    speed * angle_deg.to_radians().cos()
}

/// Applies the station's magnetic variation (degrees, east positive) to a
/// magnetic heading, giving the true heading METAR winds are reported in.
/// Identity when the variation is unknown.
pub fn magnetic_correction(heading: f64, variation: Option<f64>) -> f64 {
    (heading + variation.unwrap_or(0.0)).rem_euclid(360.0)
}

/// Fully resolved landing geometry for one wind observation against one
/// runway heading.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct WindGeometry {
    pub wind_direction: f64,
    pub wind_speed: f64,
    pub runway_heading: f64,
    pub angle: f64,
    pub crosswind_kt: f64,
    pub headwind_kt: f64,
}

impl WindGeometry {
    /// Builds the geometry, optionally substituting the gust for the
    /// sustained speed when `use_gust` is set and the gust is stronger.
    pub fn resolve(
        wind_direction: u16,
        wind_speed: u16,
        wind_gust: Option<u16>,
        use_gust: bool,
        runway_heading: f64,
    ) -> Self {
        let speed = match wind_gust {
            Some(gust) if use_gust && gust > wind_speed => gust,
            _ => wind_speed,
        };
        let speed = f64::from(speed);
        let angle = angle_between(f64::from(wind_direction), runway_heading);
        Self {
            wind_direction: f64::from(wind_direction),
            wind_speed: speed,
            runway_heading,
            angle,
            crosswind_kt: crosswind_component(speed, angle),
            headwind_kt: headwind_component(speed, angle),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_close(a: f64, b: f64) {
        assert!((a - b).abs() < 1e-9, "{a} != {b}");
    }

    #[test]
    fn test_angle_between_normalizes() {
        assert_close(angle_between(220.0, 260.0), 40.0);
        assert_close(angle_between(260.0, 220.0), 40.0);
        assert_close(angle_between(270.0, 60.0), 150.0);
        assert_close(angle_between(10.0, 350.0), 20.0);
        assert_close(angle_between(0.0, 180.0), 180.0);
        assert_close(angle_between(90.0, 90.0), 0.0);
    }

    #[test]
    fn test_angle_between_symmetric_in_range() {
        for wind in (0..360).step_by(7) {
            for runway in (0..360).step_by(11) {
                let (wind, runway) = (f64::from(wind), f64::from(runway));
                let a = angle_between(wind, runway);
                let b = angle_between(runway, wind);
                assert_close(a, b);
                assert!((0.0..=180.0).contains(&a), "angle {a} out of range");
            }
        }
    }

    #[test]
    fn test_component_cardinal_cases() {
        assert_close(crosswind_component(10.0, 0.0), 0.0);
        assert_close(headwind_component(10.0, 0.0), 10.0);
        assert_close(crosswind_component(10.0, 90.0), 10.0);
        assert_close(headwind_component(10.0, 90.0), 0.0);
        assert_close(crosswind_component(10.0, 180.0), 0.0);
        assert_close(headwind_component(10.0, 180.0), -10.0);
        assert_close(crosswind_component(0.0, 37.0), 0.0);
        assert_close(headwind_component(0.0, 37.0), 0.0);
    }

    #[test]
    fn test_components_preserve_speed() {
        for speed in [0u16, 1, 5, 10, 23, 47, 99] {
            for angle in 0..=180 {
                let (v, angle) = (f64::from(speed), f64::from(angle));
                let cross = crosswind_component(v, angle);
                let head = headwind_component(v, angle);
                let total = cross * cross + head * head;
                let expected = v * v;
                assert!(
                    (total - expected).abs() <= 1e-9 * expected.max(1.0),
                    "cross² + head² = {total}, expected {expected}"
                );
            }
        }
    }

    #[test]
    fn test_magnetic_correction() {
        assert_close(magnetic_correction(260.0, Some(7.5)), 267.5);
        assert_close(magnetic_correction(355.0, Some(10.0)), 5.0);
        assert_close(magnetic_correction(5.0, Some(-10.0)), 355.0);
        assert_close(magnetic_correction(140.0, None), 140.0);
    }

    #[test]
    fn test_resolve_gust_policy() {
        let sustained = WindGeometry::resolve(220, 10, Some(18), false, 260.0);
        assert_close(sustained.wind_speed, 10.0);

        let gusting = WindGeometry::resolve(220, 10, Some(18), true, 260.0);
        assert_close(gusting.wind_speed, 18.0);

        // A gust below the sustained speed never wins.
        let weak_gust = WindGeometry::resolve(220, 10, Some(8), true, 260.0);
        assert_close(weak_gust.wind_speed, 10.0);
    }

    #[test]
    fn test_resolve_kden_runway_26() {
        let geometry = WindGeometry::resolve(220, 10, None, false, 260.0);
        assert_close(geometry.angle, 40.0);
        assert!((geometry.crosswind_kt - 6.4279).abs() < 1e-3);
        assert!((geometry.headwind_kt - 7.6604).abs() < 1e-3);
    }
}
