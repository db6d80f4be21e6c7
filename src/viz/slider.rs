use crate::types::{RasterCube, S2Error, S2Result};
use chrono::{DateTime, Datelike, Utc};
use serde::{Deserialize, Serialize};

/// Meteorological season of the northern hemisphere
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Season {
    Winter,
    Spring,
    Summer,
    Fall,
}

impl Season {
    /// December-February is winter, then three months per season
    pub fn from_month(month: u32) -> Self {
        match month % 12 / 3 {
            0 => Season::Winter,
            1 => Season::Spring,
            2 => Season::Summer,
            _ => Season::Fall,
        }
    }

    pub fn of(time: &DateTime<Utc>) -> Self {
        Self::from_month(time.month())
    }

    pub fn name(&self) -> &'static str {
        match self {
            Season::Winter => "Winter",
            Season::Spring => "Spring",
            Season::Summer => "Summer",
            Season::Fall => "Fall",
        }
    }
}

impl std::fmt::Display for Season {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// State of a date slider bound to a cube's acquisitions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DateSlider {
    pub name: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub value: DateTime<Utc>,
}

impl DateSlider {
    /// Slider spanning the cube's time extent, starting at the acquisition nearest `initial`
    pub fn for_cube(cube: &RasterCube, initial: &DateTime<Utc>) -> S2Result<Self> {
        let (start, end) = cube.time_range().ok_or_else(|| {
            S2Error::InvalidCube("Cube has no acquisitions to slide over".to_string())
        })?;
        let index = cube
            .nearest_time_index(initial)
            .ok_or_else(|| S2Error::InvalidCube("Cube has no acquisitions".to_string()))?;
        Ok(Self {
            name: "Date".to_string(),
            start,
            end,
            value: cube.times[index],
        })
    }

    /// Move the slider; values outside the range are clamped to it
    pub fn set_value(&mut self, value: DateTime<Utc>) {
        self.value = value.clamp(self.start, self.end);
    }

    /// Acquisition displayed for the current value
    pub fn selected_index(&self, cube: &RasterCube) -> S2Result<usize> {
        cube.nearest_time_index(&self.value)
            .ok_or_else(|| S2Error::InvalidCube("Cube has no acquisitions".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::CoordinateSystem;
    use chrono::TimeZone;
    use ndarray::Array4;

    fn cube() -> RasterCube {
        let times = vec![
            Utc.with_ymd_and_hms(2022, 1, 14, 17, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2022, 5, 3, 17, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2022, 9, 20, 17, 0, 0).unwrap(),
        ];
        RasterCube::new(
            times,
            vec!["B04".to_string()],
            vec![0.0],
            vec![0.0],
            Array4::zeros((3, 1, 1, 1)),
            CoordinateSystem::Projected { epsg: 32613 },
        )
        .unwrap()
    }

    #[test]
    fn test_season_from_month() {
        let seasons: Vec<_> = (1..=12).map(Season::from_month).collect();
        use Season::*;
        assert_eq!(
            seasons,
            vec![Winter, Winter, Spring, Spring, Spring, Summer, Summer, Summer, Fall, Fall, Fall, Winter]
        );
    }

    #[test]
    fn test_slider_snaps_to_nearest_acquisition() {
        let cube = cube();
        let slider =
            DateSlider::for_cube(&cube, &Utc.with_ymd_and_hms(2022, 4, 30, 0, 0, 0).unwrap()).unwrap();
        assert_eq!(slider.value, cube.times[1]);
        assert_eq!(slider.start, cube.times[0]);
        assert_eq!(slider.end, cube.times[2]);
    }

    #[test]
    fn test_slider_clamps() {
        let cube = cube();
        let mut slider = DateSlider::for_cube(&cube, &cube.times[0]).unwrap();
        slider.set_value(Utc.with_ymd_and_hms(2023, 6, 1, 0, 0, 0).unwrap());
        assert_eq!(slider.value, cube.times[2]);
        assert_eq!(slider.selected_index(&cube).unwrap(), 2);
    }
}
