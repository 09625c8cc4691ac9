// Echonetlite FRAME
// SPDX-License-Identifier: MPL-2.0
// SPDX-FileCopyrightText: 2025 Akihiro Yamamoto <github.com/ak1211>
//
use crate::echonetlite::Edata;
use core::result;
use std::fmt;
use thiserror::Error;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum FrameError {
    #[error("EHDが不正: 0x{0:04X}")]
    InvalidEhd(u16),
    #[error("フレームが宣言より短い")]
    Truncated,
}

/// Echonetliteフレーム。EHD2で形式が分かれる。
#[derive(Clone, Eq, PartialEq, Debug)]
pub enum EchonetliteFrame {
    /// EHD = 0x10 0x81
    Format1 { tid: u16, edata: Edata },
    /// EHD = 0x10 0x82 (任意形式)
    Format2 { tid: u16, edata: Vec<u8> },
}

impl EchonetliteFrame {
    pub fn tid(&self) -> u16 {
        match self {
            Self::Format1 { tid, .. } | Self::Format2 { tid, .. } => *tid,
        }
    }

    /// バイト列にする
    pub fn encode(&self) -> Vec<u8> {
        let config = bincode::config::standard()
            .with_big_endian()
            .with_fixed_int_encoding();
        // Vecへのエンコードは失敗しない
        bincode::encode_to_vec(self, config).expect("encode_to_vec")
    }

    /// バイト列から読み取る
    pub fn decode(bytes: &[u8]) -> Result<Self, FrameError> {
        let config = bincode::config::standard()
            .with_big_endian()
            .with_fixed_int_encoding();
        match bytes {
            [0x10, 0x81, body @ ..] => {
                let ((tid, edata), _len): ((u16, Edata), usize) =
                    bincode::decode_from_slice(body, config).map_err(|_e| FrameError::Truncated)?;
                Ok(Self::Format1 { tid, edata })
            }
            [0x10, 0x82, body @ ..] => match body {
                [tid0, tid1, edata @ ..] => Ok(Self::Format2 {
                    tid: u16::from_be_bytes([*tid0, *tid1]),
                    edata: edata.to_vec(),
                }),
                _ => Err(FrameError::Truncated),
            },
            [ehd1, ehd2, ..] => Err(FrameError::InvalidEhd(u16::from_be_bytes([*ehd1, *ehd2]))),
            _ => Err(FrameError::Truncated),
        }
    }
}

impl bincode::Encode for EchonetliteFrame {
    fn encode<E: bincode::enc::Encoder>(
        &self,
        encoder: &mut E,
    ) -> result::Result<(), bincode::error::EncodeError> {
        match self {
            Self::Format1 { tid, edata } => {
                bincode::Encode::encode(&0x1081u16, encoder)?;
                bincode::Encode::encode(tid, encoder)?;
                bincode::Encode::encode(edata, encoder)?;
            }
            Self::Format2 { tid, edata } => {
                bincode::Encode::encode(&0x1082u16, encoder)?;
                bincode::Encode::encode(tid, encoder)?;
                for v in edata {
                    bincode::Encode::encode(v, encoder)?;
                }
            }
        }
        Ok(())
    }
}

impl fmt::Display for EchonetliteFrame {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Format1 { tid, edata } => write!(
                f,
                "形式1 TID=0x{:04X} ESV=0x{:02X} プロパティ{}個",
                tid,
                edata.esv,
                edata.props.len()
            ),
            Self::Format2 { tid, edata } => {
                write!(f, "形式2 TID=0x{:04X} {}バイト", tid, edata.len())
            }
        }
    }
}

#[cfg(test)]
use crate::echonetlite::{Eoj, Property};

#[test]
fn test1() {
    let frame = EchonetliteFrame::Format1 {
        tid: 0x1234,
        edata: Edata {
            seoj: Eoj {
                class_group: 0x05,
                class_code: 0xff,
                instance: 0x01,
            },
            deoj: Eoj {
                class_group: 0x02,
                class_code: 0x88,
                instance: 0x01,
            },
            esv: 0x62,
            props: vec![
                Property {
                    epc: 0xe7,
                    ..Default::default()
                },
                Property {
                    epc: 0xe8,
                    ..Default::default()
                },
            ],
        },
    };

    let binary: Vec<u8> = vec![
        0x10, 0x81, //
        0x12, 0x34, //
        0x05, 0xff, 0x01, //
        0x02, 0x88, 0x01, //
        0x62, //
        0x02, //
        0xe7, 0x00, //
        0xe8, 0x00, //
    ];

    let encoded = frame.encode();
    assert_eq!(encoded, binary);

    let decoded = EchonetliteFrame::decode(&encoded).unwrap();
    assert_eq!(frame, decoded);
}

#[test]
fn test2() {
    // EDT付きの応答フレーム
    let binary: Vec<u8> = vec![
        0x10, 0x81, //
        0x00, 0x01, //
        0x02, 0x88, 0x01, //
        0x05, 0xff, 0x01, //
        0x63, //
        0x01, //
        0xe7, 0x04, 0x00, 0x00, 0x01, 0x2c, //
    ];
    match EchonetliteFrame::decode(&binary).unwrap() {
        EchonetliteFrame::Format1 { tid, edata } => {
            assert_eq!(tid, 1);
            assert_eq!(edata.esv, 0x63);
            assert_eq!(edata.props.len(), 1);
            assert_eq!(edata.props[0].epc, 0xe7);
            assert_eq!(edata.props[0].edt, Some(vec![0x00, 0x00, 0x01, 0x2c]));
        }
        other => panic!("{:?}", other),
    }
}

#[test]
fn test3() {
    // EHD1が0x10でない、またはEHD2が未知なら不正
    assert_eq!(
        EchonetliteFrame::decode(&[0x11, 0x81, 0x00, 0x01]),
        Err(FrameError::InvalidEhd(0x1181))
    );
    assert_eq!(
        EchonetliteFrame::decode(&[0x10, 0x83, 0x00, 0x01]),
        Err(FrameError::InvalidEhd(0x1083))
    );
    // 短すぎるフレーム
    assert_eq!(
        EchonetliteFrame::decode(&[0x10]),
        Err(FrameError::Truncated)
    );
    assert_eq!(
        EchonetliteFrame::decode(&[0x10, 0x81, 0x00, 0x01, 0x02]),
        Err(FrameError::Truncated)
    );
}

#[test]
fn test4() {
    // 形式2は中身に関与しない
    let frame = EchonetliteFrame::Format2 {
        tid: 0xbeef,
        edata: vec![0xde, 0xad, 0xbe, 0xef],
    };
    let encoded = frame.encode();
    assert_eq!(encoded, vec![0x10, 0x82, 0xbe, 0xef, 0xde, 0xad, 0xbe, 0xef]);
    assert_eq!(EchonetliteFrame::decode(&encoded).unwrap(), frame);
}
