use byteorder::{ByteOrder, LittleEndian};
use pretty_assertions::assert_eq;
use serde_json::json;
use thrustlink_core::protocol::{
    crc16, decode_frame, encode_command, ClientRequest, Command, DecodedEvent, DeviceParam,
    FrameBuilder, PacketType, ParamValue, ProtocolError,
};

fn encode_json(text: &str) -> Option<Vec<u8>> {
    match ClientRequest::parse(text).ok()? {
        ClientRequest::Device(command) => encode_command(&command).ok(),
        ClientRequest::SaveSession(_) => None,
    }
}

#[test]
fn test_crc16_calculation_deterministic() {
    let inputs: [&[u8]; 4] = [b"", b"\x00", b"123456789", &[0xB2, 0xA1, 0x01, 0x01, 0xFF]];
    for input in inputs {
        assert_eq!(crc16(input), crc16(input));
    }
    assert_eq!(crc16(b"123456789"), 0x29B1);
}

#[test]
fn test_reference_data_frame_decodes() {
    let mut bytes = vec![0xB2, 0xA1, 0x01, 0x01];
    bytes.extend_from_slice(&1000u32.to_le_bytes());
    bytes.extend_from_slice(&12.5f32.to_le_bytes());
    bytes.push(0); // status
    bytes.push(0); // pad
    let crc = crc16(&bytes);
    bytes.extend_from_slice(&crc.to_le_bytes());
    assert_eq!(bytes.len(), 16);

    let event = decode_frame(&bytes).expect("reference frame must decode");
    assert_eq!(
        serde_json::to_value(&event).unwrap(),
        json!({"type": "data", "tempo": 1.0, "forca": 12.5, "status": 0})
    );
}

#[test]
fn test_builder_frames_validate_through_decoder() {
    let frames = [
        FrameBuilder::new(PacketType::Data)
            .u32_le(5)
            .f32_le(-3.25)
            .byte(2)
            .build(),
        FrameBuilder::new(PacketType::Status)
            .byte(3)
            .byte(0x12)
            .u16_le(0)
            .u32_le(60_000)
            .build(),
        FrameBuilder::new(PacketType::Config).f32_le(1.0).f32_le(9.8).build(),
    ];
    let kinds: Vec<&str> = frames
        .iter()
        .map(|f| decode_frame(f).expect("decodes").kind())
        .collect();
    assert_eq!(kinds, vec!["data", "status", "config"]);
}

#[test]
fn test_status_frame_serialization() {
    let frame = FrameBuilder::new(PacketType::Status)
        .byte(3)
        .byte(0x12)
        .u16_le(9)
        .u32_le(1500)
        .build();
    assert_eq!(
        serde_json::to_value(decode_frame(&frame).unwrap()).unwrap(),
        json!({
            "type": "status",
            "status": "error",
            "message": "Calibração falhou",
            "code": 0x12,
            "value": 9,
            "timestamp": 1.5
        })
    );
}

#[test]
fn test_config_nan_fields_serialize_as_null() {
    let frame = FrameBuilder::new(PacketType::Config)
        .f32_le(f32::NAN)
        .f32_le(f32::INFINITY)
        .u16_le(3)
        .f32_le(f32::NEG_INFINITY)
        .build();
    let text = serde_json::to_string(&decode_frame(&frame).unwrap()).unwrap();
    let value: serde_json::Value = serde_json::from_str(&text).expect("valid JSON");
    assert_eq!(value["conversionFactor"], json!(null));
    assert_eq!(value["gravity"], json!(null));
    assert_eq!(value["toleranciaEstabilidade"], json!(null));
    assert_eq!(value["leiturasEstaveis"], json!(3));
}

#[test]
fn test_data_nan_force_serializes_as_null() {
    let frame = FrameBuilder::new(PacketType::Data)
        .u32_le(1)
        .f32_le(f32::NAN)
        .build();
    let DecodedEvent::Data(reading) = decode_frame(&frame).unwrap() else {
        panic!("expected data");
    };
    assert_eq!(reading.force_n, None);
}

#[test]
fn test_calibrate_json_encodes_ten_byte_frame() {
    let frame = encode_json(r#"{"cmd":"calibrate","massa_g":500}"#).expect("frame");
    assert_eq!(frame.len(), 10);
    assert_eq!(frame[3], 0x11);
    assert_eq!(LittleEndian::read_f32(&frame[4..8]), 500.0);
    assert_eq!(LittleEndian::read_u16(&frame[8..10]), crc16(&frame[..8]));
}

#[test]
fn test_zero_mass_produces_no_frame() {
    assert_eq!(encode_json(r#"{"cmd":"calibrate","massa_g":0}"#), None);
    assert!(matches!(
        ClientRequest::parse(r#"{"cmd":"c","massa_g":0}"#),
        Err(ProtocolError::CommandRejected(_))
    ));
}

#[test]
fn test_unknown_param_produces_no_frame() {
    assert_eq!(
        encode_json(r#"{"cmd":"set_param","param":"nope","value":1}"#),
        None
    );
}

#[test]
fn test_every_param_encodes_to_declared_length() {
    for param in DeviceParam::ALL {
        let text = json!({"cmd": "set", "param": param.wire_name(), "value": 7}).to_string();
        let frame = encode_json(&text).expect("known parameter encodes");
        assert_eq!(frame.len(), PacketType::SetParam.frame_len());
        assert_eq!(frame[4], param.id());
    }
}

#[test]
fn test_set_param_float_parameter() {
    let request = ClientRequest::parse(
        r#"{"cmd":"set","param":"capacidadeMaximaGramas","value":"5000.5"}"#,
    )
    .unwrap();
    assert_eq!(
        request,
        ClientRequest::Device(Command::SetParam {
            param: DeviceParam::MaxCapacityGrams,
            value: ParamValue::Float(5000.5),
        })
    );
}

#[test]
fn test_protocol_error_display() {
    let err = ProtocolError::CrcMismatch {
        expected: 0x1234,
        actual: 0xABCD,
    };
    assert_eq!(err.to_string(), "CRC mismatch: expected 0x1234, got 0xabcd");
    assert!(err.is_malformed_frame());
    assert!(!ProtocolError::NotConnected.is_malformed_frame());
}
