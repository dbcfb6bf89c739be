use serde::Serialize;

/// Book performance numbers for the aircraft the assistant knows about.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct AircraftSpecs {
    pub type_code: &'static str,
    pub name: &'static str,
    pub cruise_kt: u16,
    pub fuel_burn_gph: f64,
    pub usable_fuel_gal: f64,
    pub max_demo_crosswind_kt: u16,
}

pub static AIRCRAFT: &[AircraftSpecs] = &[
    AircraftSpecs {
        type_code: "C172",
        name: "Cessna 172S Skyhawk",
        cruise_kt: 122,
        fuel_burn_gph: 8.5,
        usable_fuel_gal: 53.0,
        max_demo_crosswind_kt: 15,
    },
    AircraftSpecs {
        type_code: "C182",
        name: "Cessna 182T Skylane",
        cruise_kt: 145,
        fuel_burn_gph: 13.0,
        usable_fuel_gal: 87.0,
        max_demo_crosswind_kt: 15,
    },
    AircraftSpecs {
        type_code: "PA28",
        name: "Piper PA-28-181 Archer",
        cruise_kt: 128,
        fuel_burn_gph: 10.0,
        usable_fuel_gal: 48.0,
        max_demo_crosswind_kt: 17,
    },
    AircraftSpecs {
        type_code: "SR22",
        name: "Cirrus SR22",
        cruise_kt: 183,
        fuel_burn_gph: 17.0,
        usable_fuel_gal: 92.0,
        max_demo_crosswind_kt: 21,
    },
    AircraftSpecs {
        type_code: "DA40",
        name: "Diamond DA40 Star",
        cruise_kt: 150,
        fuel_burn_gph: 9.5,
        usable_fuel_gal: 39.0,
        max_demo_crosswind_kt: 20,
    },
    AircraftSpecs {
        type_code: "BE36",
        name: "Beechcraft Bonanza A36",
        cruise_kt: 176,
        fuel_burn_gph: 15.5,
        usable_fuel_gal: 74.0,
        max_demo_crosswind_kt: 17,
    },
];

pub fn specs(type_code: &str) -> Option<&'static AircraftSpecs> {
    let wanted = normalize(type_code);
    AIRCRAFT.iter().find(|a| normalize(a.type_code) == wanted)
}

fn normalize(code: &str) -> String {
    code.chars()
        .filter(char::is_ascii_alphanumeric)
        .map(|c| c.to_ascii_uppercase())
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct FuelBurn {
    pub gallons: f64,
    /// Day VFR reserve, 45 minutes at the planned burn.
    pub reserve_gallons: f64,
    pub total_required_gallons: f64,
    pub endurance_hours: f64,
    pub within_capacity: bool,
}

pub fn fuel_burn(type_code: &str, hours: f64) -> Option<FuelBurn> {
    let specs = specs(type_code)?;
    let gallons = specs.fuel_burn_gph * hours;
    let reserve_gallons = specs.fuel_burn_gph * 0.75;
    let total_required_gallons = gallons + reserve_gallons;
    Some(FuelBurn {
        gallons,
        reserve_gallons,
        total_required_gallons,
        endurance_hours: specs.usable_fuel_gal / specs.fuel_burn_gph,
        within_capacity: total_required_gallons <= specs.usable_fuel_gal,
    })
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct ManualNote {
    pub topic: &'static str,
    #[serde(skip)]
    pub keywords: &'static [&'static str],
    pub body: &'static str,
}

pub static MANUAL_NOTES: &[ManualNote] = &[
    ManualNote {
        topic: "Crosswind landing technique",
        keywords: &["crosswind", "sideslip", "crab", "technique"],
        body: "Use the crab method on final, transitioning to a sideslip in the flare: \
               upwind wing low, opposite rudder to keep the nose aligned with the \
               centerline. Land on the upwind main wheel first. Respect the maximum \
               demonstrated crosswind component for the type.",
    },
    ManualNote {
        topic: "Gusty wind approach speeds",
        keywords: &["gust", "gusty", "approach speed", "wind additive"],
        body: "Add half the gust factor to the normal approach speed. For a wind of \
               15 gusting 25, add 5 knots. Fly the airplane onto the runway; avoid \
               holding it off in the flare.",
    },
    ManualNote {
        topic: "Fuel reserves",
        keywords: &["fuel", "reserve", "reserves", "endurance"],
        body: "Day VFR requires fuel to the first point of intended landing plus 30 \
               minutes at normal cruise; night VFR and common practice use 45 minutes. \
               Plan with the higher figure.",
    },
    ManualNote {
        topic: "VFR weather minimums",
        keywords: &["vfr", "minimums", "visibility", "ceiling", "cloud clearance"],
        body: "Basic VFR in controlled airspace below 10,000 ft requires 3 statute \
               miles visibility and cloud clearance of 500 ft below, 1,000 ft above, \
               2,000 ft horizontal.",
    },
];

/// Best keyword match for a free-form topic, or `None` when nothing hits.
pub fn query_manual(topic: &str) -> Option<&'static ManualNote> {
    let lowered = topic.to_lowercase();
    MANUAL_NOTES
        .iter()
        .map(|note| {
            let hits = note
                .keywords
                .iter()
                .filter(|keyword| lowered.contains(*keyword))
                .count();
            (hits, note)
        })
        .filter(|(hits, _)| *hits > 0)
        .max_by_key(|(hits, _)| *hits)
        .map(|(_, note)| note)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_specs_lookup_is_case_and_punctuation_tolerant() {
        assert_eq!(specs("C172").unwrap().type_code, "C172");
        assert_eq!(specs("c-172").unwrap().type_code, "C172");
        assert_eq!(specs("sr22").unwrap().type_code, "SR22");
        assert!(specs("B747").is_none());
    }

    #[test]
    fn test_fuel_burn_arithmetic() {
        let burn = fuel_burn("C172", 3.0).unwrap();
        assert!((burn.gallons - 25.5).abs() < 1e-9);
        assert!((burn.reserve_gallons - 6.375).abs() < 1e-9);
        assert!(burn.within_capacity);

        let long = fuel_burn("C172", 6.0).unwrap();
        assert!(!long.within_capacity);
    }

    #[test]
    fn test_manual_lookup() {
        let note = query_manual("crosswind technique for landing").unwrap();
        assert_eq!(note.topic, "Crosswind landing technique");

        let gusts = query_manual("approach speed in gusty wind").unwrap();
        assert_eq!(gusts.topic, "Gusty wind approach speeds");

        let fuel = query_manual("what are the fuel reserve rules").unwrap();
        assert_eq!(fuel.topic, "Fuel reserves");

        assert!(query_manual("how do jet engines work").is_none());
    }
}
