//! Unit tests for the FTMS, Heart Rate and Cycling Power codecs.

use ridedata::sensors::ftms::{
    decode_control_command, decode_control_point_response, decode_cycling_power_measurement,
    decode_device_info_string, decode_fitness_machine_feature, decode_heart_rate_measurement,
    decode_indoor_bike_data, encode_control_command, indoor_bike_data_len, ControlCommand,
    DecodeError, ExpendedEnergy, FeatureSet, IndoorBikeField, ResultCode, StopKind,
};

#[test]
fn test_speed_only_example() {
    let data = [0x02, 0x00, 0xE8, 0x03];
    let result = decode_indoor_bike_data(&data).unwrap();

    assert!((result.speed_kmh.unwrap() - 10.0).abs() < 0.001);
    assert!(result.cadence_rpm.is_none());
    assert!(result.power_watts.is_none());
    assert!(result.total_distance_m.is_none());
    assert!(result.heart_rate_bpm.is_none());
}

#[test]
fn test_power_only_example() {
    let data = [0x40, 0x00, 0x2C, 0x01];
    let result = decode_indoor_bike_data(&data).unwrap();

    assert_eq!(result.power_watts, Some(300));
    assert!(result.speed_kmh.is_none());
}

#[test]
fn test_flags_only_payload() {
    let result = decode_indoor_bike_data(&[0x00, 0x00]).unwrap();
    assert!(result.is_empty());
    assert_eq!(result.flags, 0);
}

#[test]
fn test_empty_payload() {
    assert_eq!(decode_indoor_bike_data(&[]), Err(DecodeError::Empty));
}

#[test]
fn test_single_byte_truncates_flags() {
    assert!(matches!(
        decode_indoor_bike_data(&[0x02]),
        Err(DecodeError::Truncated { field: "flags", .. })
    ));
}

#[test]
fn test_speed_cadence_power() {
    // Flags: 0x0046 (speed + instantaneous cadence + instantaneous power)
    // Speed: 3500 = 35.00 km/h, Cadence: 190 = 95 RPM, Power: 300W
    let data = [0x46, 0x00, 0xAC, 0x0D, 0xBE, 0x00, 0x2C, 0x01];
    let result = decode_indoor_bike_data(&data).unwrap();

    assert!((result.speed_kmh.unwrap() - 35.0).abs() < 0.01);
    assert_eq!(result.cadence_rpm, Some(95.0));
    assert_eq!(result.power_watts, Some(300));
}

#[test]
fn test_half_rpm_cadence() {
    // Cadence: 181 = 90.5 RPM
    let data = [0x04, 0x00, 0xB5, 0x00];
    let result = decode_indoor_bike_data(&data).unwrap();
    assert_eq!(result.cadence_rpm, Some(90.5));
}

#[test]
fn test_average_fields() {
    // Flags: 0x0089 (more data + average cadence + average power)
    let data = [0x89, 0x00, 0xA0, 0x00, 0xC8, 0x00];
    let result = decode_indoor_bike_data(&data).unwrap();

    assert!(result.speed_kmh.is_none());
    assert!(result.avg_speed_kmh.is_none());
    assert_eq!(result.avg_cadence_rpm, Some(80.0));
    assert_eq!(result.avg_power_watts, Some(200));
    assert!(result.power_watts.is_none());
}

#[test]
fn test_more_data_turns_speed_into_average() {
    let data = [0x03, 0x00, 0xC4, 0x09];
    let result = decode_indoor_bike_data(&data).unwrap();

    assert!(result.speed_kmh.is_none());
    assert!((result.avg_speed_kmh.unwrap() - 25.0).abs() < 0.01);
}

#[test]
fn test_distance_is_24_bit() {
    // 0x01E240 = 123456 m
    let data = [0x10, 0x00, 0x40, 0xE2, 0x01];
    let result = decode_indoor_bike_data(&data).unwrap();
    assert_eq!(result.total_distance_m, Some(123_456));
}

#[test]
fn test_energy_triple() {
    let data = [0x00, 0x01, 0x2C, 0x01, 0x58, 0x02, 0x0A];
    let result = decode_indoor_bike_data(&data).unwrap();

    assert_eq!(
        result.energy,
        Some(ExpendedEnergy {
            total_kcal: 300,
            per_hour_kcal: 600,
            per_minute_kcal: 10,
        })
    );
}

#[test]
fn test_short_energy_triple_is_truncated() {
    let data = [0x00, 0x01, 0x2C, 0x01, 0x58];
    assert_eq!(
        decode_indoor_bike_data(&data),
        Err(DecodeError::Truncated {
            field: "expended energy",
            offset: 2,
            needed: 5,
            available: 5,
        })
    );
}

#[test]
fn test_negative_resistance_and_power() {
    // Flags: 0x0060 (resistance + power), both -10
    let data = [0x60, 0x00, 0xF6, 0xFF, 0xF6, 0xFF];
    let result = decode_indoor_bike_data(&data).unwrap();

    assert_eq!(result.resistance_level, Some(-10));
    assert_eq!(result.power_watts, Some(-10));
}

#[test]
fn test_mixed_fields_in_wire_order() {
    // Flags: 0x0B12 (speed, distance, energy, heart rate, elapsed time)
    let data = [
        0x12, 0x0B, // flags
        0xC4, 0x09, // 25.00 km/h
        0x10, 0x27, 0x00, // 10000 m
        0x64, 0x00, 0xC8, 0x00, 0x03, // energy
        0x96, // 150 bpm
        0x58, 0x02, // 600 s
    ];
    let result = decode_indoor_bike_data(&data).unwrap();

    assert!((result.speed_kmh.unwrap() - 25.0).abs() < 0.01);
    assert_eq!(result.total_distance_m, Some(10_000));
    assert_eq!(result.energy.unwrap().total_kcal, 100);
    assert_eq!(result.heart_rate_bpm, Some(150));
    assert_eq!(result.elapsed_time_s, Some(600));
    assert!(result.remaining_time_s.is_none());
    assert!(result.metabolic_equivalent.is_none());
}

#[test]
fn test_metabolic_equivalent_and_remaining_time() {
    let data = [0x00, 0x14, 0x4B, 0x2C, 0x01];
    let result = decode_indoor_bike_data(&data).unwrap();

    assert_eq!(result.metabolic_equivalent, Some(7.5));
    assert_eq!(result.remaining_time_s, Some(300));
}

#[test]
fn test_trailing_bytes_are_ignored() {
    let data = [0x40, 0x00, 0x2C, 0x01, 0xAA, 0xBB];
    assert_eq!(decode_indoor_bike_data(&data).unwrap().power_watts, Some(300));
}

#[test]
fn test_exact_length_decodes_for_every_flag_combination() {
    for flags in 0u16..0x2000 {
        let len = indoor_bike_data_len(flags);
        let mut data = vec![0u8; len];
        data[..2].copy_from_slice(&flags.to_le_bytes());

        let decoded = decode_indoor_bike_data(&data)
            .unwrap_or_else(|e| panic!("flags {flags:#06x}: {e}"));
        assert_eq!(decoded.flags, flags);

        assert!(
            matches!(
                decode_indoor_bike_data(&data[..len - 1]),
                Err(DecodeError::Truncated { .. })
            ),
            "flags {flags:#06x} accepted a short payload"
        );
    }
}

#[test]
fn test_payload_length_by_flags() {
    assert_eq!(indoor_bike_data_len(0x0000), 2);
    assert_eq!(indoor_bike_data_len(0x0002), 4);
    assert_eq!(indoor_bike_data_len(0x0010), 5);
    assert_eq!(indoor_bike_data_len(0x0100), 7);
    assert_eq!(indoor_bike_data_len(0x1FFE), 2 + 2 + 2 + 2 + 3 + 2 + 2 + 2 + 5 + 1 + 1 + 2 + 2);
}

#[test]
fn test_heart_rate_u8() {
    let result = decode_heart_rate_measurement(&[0x00, 72]).unwrap();
    assert_eq!(result.heart_rate_bpm, 72);
    assert!(result.sensor_contact.is_none());
    assert!(result.rr_intervals.is_empty());
}

#[test]
fn test_heart_rate_u16() {
    let result = decode_heart_rate_measurement(&[0x01, 0x2C, 0x01]).unwrap();
    assert_eq!(result.heart_rate_bpm, 300);
}

#[test]
fn test_heart_rate_contact_status() {
    assert_eq!(
        decode_heart_rate_measurement(&[0x06, 80]).unwrap().sensor_contact,
        Some(true)
    );
    assert_eq!(
        decode_heart_rate_measurement(&[0x04, 80]).unwrap().sensor_contact,
        Some(false)
    );
}

#[test]
fn test_heart_rate_rr_intervals() {
    let data = [0x10, 70, 0x00, 0x04, 0x10, 0x04];
    let result = decode_heart_rate_measurement(&data).unwrap();
    assert_eq!(result.rr_intervals, vec![1024, 1040]);
}

#[test]
fn test_heart_rate_energy_before_rr() {
    let data = [0x18, 70, 0x20, 0x00, 0x00, 0x04];
    let result = decode_heart_rate_measurement(&data).unwrap();
    assert_eq!(result.energy_expended_kj, Some(32));
    assert_eq!(result.rr_intervals, vec![1024]);
}

#[test]
fn test_heart_rate_rejects_short_payloads() {
    assert_eq!(decode_heart_rate_measurement(&[]), Err(DecodeError::Empty));
    assert!(matches!(
        decode_heart_rate_measurement(&[0x01, 0x50]),
        Err(DecodeError::Truncated { field: "heart rate", .. })
    ));
}

#[test]
fn test_heart_rate_ignores_odd_trailing_rr_byte() {
    let result = decode_heart_rate_measurement(&[0x10, 70, 0x00, 0x04, 0x10]).unwrap();
    assert_eq!(result.heart_rate_bpm, 70);
    assert_eq!(result.rr_intervals, vec![1024]);

    let result = decode_heart_rate_measurement(&[0x10, 70, 0x00]).unwrap();
    assert_eq!(result.heart_rate_bpm, 70);
    assert!(result.rr_intervals.is_empty());
}

#[test]
fn test_cycling_power_minimal() {
    let result = decode_cycling_power_measurement(&[0x00, 0x00, 0xFA, 0x00]).unwrap();
    assert_eq!(result.power_watts, 250);
    assert!(result.crank_revolutions.is_none());
}

#[test]
fn test_cycling_power_balance_and_crank() {
    let data = [0x21, 0x00, 0xC8, 0x00, 0x64, 0x0A, 0x00, 0x00, 0x04];
    let result = decode_cycling_power_measurement(&data).unwrap();

    assert_eq!(result.power_watts, 200);
    assert_eq!(result.power_balance, Some(100));
    assert_eq!(result.crank_revolutions, Some(10));
    assert_eq!(result.last_crank_event_time, Some(1024));
}

#[test]
fn test_cycling_power_torque_and_wheel() {
    let data = [
        0x14, 0x00, 0x64, 0x00, // flags, 100 W
        0x40, 0x00, // torque
        0x01, 0x00, 0x00, 0x00, 0x00, 0x08, // wheel revs, event time
    ];
    let result = decode_cycling_power_measurement(&data).unwrap();

    assert_eq!(result.accumulated_torque, Some(64));
    assert_eq!(result.wheel_revolutions, Some(1));
    assert_eq!(result.last_wheel_event_time, Some(2048));
}

#[test]
fn test_cycling_power_truncated() {
    assert_eq!(decode_cycling_power_measurement(&[]), Err(DecodeError::Empty));
    assert!(matches!(
        decode_cycling_power_measurement(&[0x00, 0x00, 0xFA]),
        Err(DecodeError::Truncated { field: "instantaneous power", .. })
    ));
}

#[test]
fn test_encode_exact_bytes() {
    let cases = [
        (ControlCommand::RequestControl, vec![0x00]),
        (ControlCommand::Reset, vec![0x01]),
        (
            ControlCommand::SetTargetResistance { level_tenths: 100 },
            vec![0x04, 0x64, 0x00],
        ),
        (ControlCommand::SetTargetPower { watts: 250 }, vec![0x05, 0xFA, 0x00]),
        (ControlCommand::StartOrResume, vec![0x07]),
        (
            ControlCommand::StopOrPause {
                kind: StopKind::Pause,
            },
            vec![0x08, 0x02],
        ),
        (
            ControlCommand::SetIndoorBikeSimulation {
                wind_speed: 0,
                grade: 500,
                crr: 40,
                cw: 51,
            },
            vec![0x11, 0x00, 0x00, 0xF4, 0x01, 0x28, 0x33],
        ),
    ];

    for (command, bytes) in cases {
        assert_eq!(encode_control_command(&command), bytes, "{command:?}");
        assert_eq!(decode_control_command(&bytes).unwrap(), command);
    }
}

#[test]
fn test_negative_simulation_grade_survives() {
    let command = ControlCommand::SetIndoorBikeSimulation {
        wind_speed: -1500,
        grade: -350,
        crr: 33,
        cw: 51,
    };
    assert_eq!(
        decode_control_command(&encode_control_command(&command)).unwrap(),
        command
    );
}

#[test]
fn test_decode_command_errors() {
    assert_eq!(decode_control_command(&[]), Err(DecodeError::Empty));
    assert_eq!(
        decode_control_command(&[0x42]),
        Err(DecodeError::UnknownOpcode(0x42))
    );
    assert_eq!(
        decode_control_command(&[0x08, 0x03]),
        Err(DecodeError::InvalidParameter {
            field: "stop or pause parameter",
            value: 0x03,
        })
    );
    assert!(matches!(
        decode_control_command(&[0x05, 0xFA]),
        Err(DecodeError::Truncated { field: "target power", .. })
    ));
    // A response indication is not a command
    assert_eq!(
        decode_control_command(&[0x80, 0x05, 0x01]),
        Err(DecodeError::UnknownOpcode(0x80))
    );
}

#[test]
fn test_control_command_json_shape() {
    let json = serde_json::to_value(ControlCommand::SetTargetPower { watts: 250 }).unwrap();
    assert_eq!(
        json,
        serde_json::json!({ "command": "set_target_power", "watts": 250 })
    );
    let parsed: ControlCommand =
        serde_json::from_str(r#"{"command":"stop_or_pause","kind":"Stop"}"#).unwrap();
    assert_eq!(
        parsed,
        ControlCommand::StopOrPause {
            kind: StopKind::Stop
        }
    );
}

#[test]
fn test_control_point_response() {
    let ok = decode_control_point_response(&[0x80, 0x05, 0x01]).unwrap();
    assert_eq!(ok.request_opcode, 0x05);
    assert!(ok.is_success());

    let rejected = decode_control_point_response(&[0x80, 0x05, 0x03]).unwrap();
    assert_eq!(rejected.result, ResultCode::InvalidParameter);
    assert!(!rejected.is_success());

    assert_eq!(
        decode_control_point_response(&[0x80, 0x11, 0x09]).unwrap().result,
        ResultCode::Reserved(0x09)
    );
    assert_eq!(
        decode_control_point_response(&[0x05]),
        Err(DecodeError::UnknownOpcode(0x05))
    );
    assert_eq!(decode_control_point_response(&[]), Err(DecodeError::Empty));
    assert!(matches!(
        decode_control_point_response(&[0x80]),
        Err(DecodeError::Truncated { .. })
    ));
}

#[test]
fn test_feature_set_decode() {
    let features =
        decode_fitness_machine_feature(&[0x86, 0x50, 0x00, 0x00, 0x0C, 0x00, 0x00, 0x00]).unwrap();

    assert!(features.supports(FeatureSet::CADENCE));
    assert!(features.supports(FeatureSet::TOTAL_DISTANCE));
    assert!(features.supports(FeatureSet::POWER_MEASUREMENT));
    assert!(!features.supports(FeatureSet::HEART_RATE));
    assert!(features.supports_target(FeatureSet::TARGET_POWER));
    assert!(!features.supports_target(FeatureSet::TARGET_SIMULATION));
}

#[test]
fn test_feature_set_without_target_settings() {
    let features = decode_fitness_machine_feature(&[0x02, 0x00, 0x00, 0x00]).unwrap();
    assert!(features.supports(FeatureSet::CADENCE));
    assert_eq!(features.target_settings(), 0);

    assert_eq!(decode_fitness_machine_feature(&[]), Err(DecodeError::Empty));
    assert!(matches!(
        decode_fitness_machine_feature(&[0x02, 0x00]),
        Err(DecodeError::Truncated { .. })
    ));
}

#[test]
fn test_undeclared_fields() {
    let features = FeatureSet::new(FeatureSet::CADENCE, 0);

    // Speed, cadence and power: only power was never declared
    assert_eq!(
        features.undeclared_fields(0x0046),
        vec![IndoorBikeField::InstantaneousPower]
    );
    assert!(features.undeclared_fields(0x0006).is_empty());
    // Average speed needs its own feature bit
    assert_eq!(
        features.undeclared_fields(0x0003),
        vec![IndoorBikeField::Speed]
    );
}

#[test]
fn test_device_info_strings() {
    assert_eq!(decode_device_info_string(b"Wahoo Fitness\0\0"), "Wahoo Fitness");
    assert_eq!(decode_device_info_string(b" 4.1.0 "), "4.1.0");
    assert_eq!(decode_device_info_string(b""), "");
    assert_eq!(decode_device_info_string(&[0x57, 0xFF]), "W\u{FFFD}");
}
