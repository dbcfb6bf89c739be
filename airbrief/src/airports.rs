use serde::Serialize;
use windcalc::{WindString, angle_between, crosswind_component, headwind_component, magnetic_correction};

#[derive(Debug, Clone, Copy)]
pub struct RunwayEnd {
    pub ident: &'static str,
    /// Published magnetic heading in degrees.
    pub heading: u16,
}

#[derive(Debug, Clone, Copy)]
pub struct AirportInfo {
    pub icao: &'static str,
    /// Magnetic variation in degrees, east positive. `None` when unknown;
    /// headings are then compared uncorrected.
    pub variation: Option<f64>,
    pub runways: &'static [RunwayEnd],
}

macro_rules! ends {
    ($(($ident:literal, $heading:literal)),+ $(,)?) => {
        &[$(RunwayEnd { ident: $ident, heading: $heading }),+]
    };
}

pub static AIRPORTS: &[AirportInfo] = &[
    AirportInfo {
        icao: "KMCO",
        variation: Some(-7.0),
        runways: ends![("17L", 170), ("35R", 350), ("18L", 180), ("36R", 360)],
    },
    AirportInfo {
        icao: "KDEN",
        variation: Some(7.5),
        runways: ends![
            ("08", 80),
            ("26", 260),
            ("16R", 160),
            ("34L", 340),
            ("17L", 170),
            ("35R", 350),
        ],
    },
    AirportInfo {
        icao: "KSFO",
        variation: Some(13.0),
        runways: ends![("10L", 100), ("28R", 280), ("01R", 10), ("19L", 190)],
    },
    AirportInfo {
        icao: "KBOS",
        variation: Some(-14.0),
        runways: ends![("04R", 40), ("22L", 220), ("15R", 150), ("33L", 330)],
    },
    AirportInfo {
        icao: "RPLL",
        variation: None,
        runways: ends![("06", 60), ("24", 240), ("13", 130), ("31", 310)],
    },
    AirportInfo {
        icao: "ENGM",
        variation: Some(4.0),
        runways: ends![("01L", 10), ("19R", 190), ("01R", 10), ("19L", 190)],
    },
];

pub fn airport(icao: &str) -> Option<&'static AirportInfo> {
    AIRPORTS.iter().find(|a| a.icao == icao)
}

pub fn variation(icao: &str) -> Option<f64> {
    airport(icao).and_then(|a| a.variation)
}

/// A chosen runway for one request. The rationale is display text and is
/// never parsed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunwaySelection {
    pub airport: String,
    pub runway: String,
    pub heading: u16,
    pub rationale: String,
}

/// Picks the runway end minimizing the crosswind against `wind`, breaking
/// ties toward the larger headwind. A `preferred` designator (from a query
/// like "runway 260" or "runway 17L") overrides the search. Airports without
/// a catalog entry get a synthetic headwind-aligned runway.
pub fn select_runway(
    icao: &str,
    wind: &WindString,
    preferred: Option<&str>,
    apply_variation: bool,
) -> RunwaySelection {
    let station_variation = if apply_variation { variation(icao) } else { None };

    if let Some((ident, heading)) = preferred.and_then(parse_designator) {
        return RunwaySelection {
            airport: icao.to_string(),
            runway: ident.clone(),
            heading,
            rationale: format!("Runway {ident} was requested explicitly."),
        };
    }

    let Some(info) = airport(icao) else {
        return synthetic_selection(icao, wind);
    };

    let (Some(dir), Some(speed)) = (wind.direction, wind.speed) else {
        let end = info.runways[0];
        return RunwaySelection {
            airport: icao.to_string(),
            runway: end.ident.to_string(),
            heading: end.heading,
            rationale: format!(
                "Wind is light or variable; defaulting to runway {}.",
                end.ident
            ),
        };
    };
    if speed == 0 {
        let end = info.runways[0];
        return RunwaySelection {
            airport: icao.to_string(),
            runway: end.ident.to_string(),
            heading: end.heading,
            rationale: format!("Wind is calm; defaulting to runway {}.", end.ident),
        };
    }

    let speed = f64::from(speed);
    let mut best: Option<(&RunwayEnd, f64, f64)> = None;
    for end in info.runways {
        let compare_heading = magnetic_correction(f64::from(end.heading), station_variation);
        let angle = angle_between(f64::from(dir), compare_heading);
        let cross = crosswind_component(speed, angle);
        let head = headwind_component(speed, angle);
        let better = match best {
            None => true,
            Some((_, best_cross, best_head)) => {
                cross + 1e-9 < best_cross
                    || ((cross - best_cross).abs() <= 1e-9 && head > best_head)
            }
        };
        if better {
            best = Some((end, cross, head));
        }
    }
    let (end, cross, head) = best.expect("catalog airports have at least one runway end");
    RunwaySelection {
        airport: icao.to_string(),
        runway: end.ident.to_string(),
        heading: end.heading,
        rationale: format!(
            "Runway {} gives {:.1} kt crosswind and {:.1} kt {} against the {:03}° at {:.0} kt wind.",
            end.ident,
            cross,
            head.abs(),
            if head >= 0.0 { "headwind" } else { "tailwind" },
            dir,
            speed,
        ),
    }
}

fn synthetic_selection(icao: &str, wind: &WindString) -> RunwaySelection {
    let number = match wind.direction {
        Some(dir) => {
            let rounded = ((u32::from(dir) + 5) / 10) % 36;
            if rounded == 0 { 36 } else { rounded }
        }
        None => 36,
    };
    let heading = ((number * 10) % 360) as u16;
    RunwaySelection {
        airport: icao.to_string(),
        runway: format!("{number:02}"),
        heading,
        rationale: format!(
            "No runway data for {icao}; assuming a headwind-aligned runway {number:02}."
        ),
    }
}

/// `"260"` is a heading, `"26"`/`"17L"` are runway numbers; the heading is
/// the number times ten, modulo 360.
fn parse_designator(designator: &str) -> Option<(String, u16)> {
    let trimmed = designator.trim().to_ascii_uppercase();
    let (digits, suffix) = match trimmed.strip_suffix(['L', 'R', 'C']) {
        Some(digits) => (digits, &trimmed[digits.len()..]),
        None => (trimmed.as_str(), ""),
    };
    let value: u32 = digits.parse().ok()?;
    let (number, heading) = if digits.len() == 3 {
        let heading = value % 360;
        (heading / 10, heading)
    } else if (1..=36).contains(&value) {
        (value, (value * 10) % 360)
    } else {
        return None;
    };
    Some((format!("{number:02}{suffix}"), heading as u16))
}
