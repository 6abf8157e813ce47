use crate::relay::data::telemetry::DecodedReading;

/// Export value the device reports when it glitches.
pub const GLITCH_POWER: i16 = 3094;

/// Flags the "3094 condition": the device occasionally reports exactly
/// 3094 W exported with exactly 3094 W of negative consumption. Such
/// readings must not be published but the frame is still relayed.
pub fn is_suspect(reading: &DecodedReading) -> bool {
    reading.exporting_power == GLITCH_POWER
        && reading.consuming_power == -i32::from(GLITCH_POWER)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relay::data::telemetry::{decode, tests::frame};

    fn reading(exporting: i16, consuming: i32) -> DecodedReading {
        DecodedReading {
            serial_number: 1,
            exporting_power: exporting,
            generating_power: 0,
            diverting_power: 0,
            consuming_power: consuming,
            importing_power: -i32::from(exporting),
        }
    }

    #[test]
    fn test_glitch_signature_is_suspect() {
        assert!(is_suspect(&reading(3094, -3094)));
    }

    #[test]
    fn test_near_misses_are_not_suspect() {
        assert!(!is_suspect(&reading(3094, -3000)));
        assert!(!is_suspect(&reading(3093, -3094)));
        assert!(!is_suspect(&reading(-3094, 3094)));
        assert!(!is_suspect(&reading(3094, 3094)));
        assert!(!is_suspect(&reading(0, 0)));
    }

    #[test]
    fn test_glitch_from_wire() {
        // exporting 3094 with nothing generated or diverted gives -3094 consumed
        let glitch = decode(&frame(77, 3094, 0, 0)).unwrap();
        assert!(is_suspect(&glitch));

        let normal = decode(&frame(77, 3094, 94, 0)).unwrap();
        assert_eq!(normal.consuming_power, -3000);
        assert!(!is_suspect(&normal));
    }
}
