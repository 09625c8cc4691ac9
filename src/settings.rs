// 設定ファイル
// SPDX-License-Identifier: MPL-2.0
// SPDX-FileCopyrightText: 2025 Akihiro Yamamoto <github.com/ak1211>
//
use crate::echonetlite::Eoj;
use crate::skstack::session::{Credentials, Id, Password};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

fn default_baud() -> u32 {
    115200
}

fn default_listen() -> String {
    "0.0.0.0:9863".to_owned()
}

fn default_scan_channel_mask() -> u32 {
    0xFFFFFFFF
}

fn default_scan_duration() -> u8 {
    6
}

fn default_recv_timeout_ms() -> i32 {
    5000
}

// 低圧スマート電力量メータクラス
fn default_target_object() -> Eoj {
    Eoj {
        class_group: 0x02,
        class_code: 0x88,
        instance: 0x01,
    }
}

/// ルートB認証情報
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct CredentialSettings {
    pub rbid: String,
    pub password: String,
}

impl CredentialSettings {
    pub fn to_credentials(&self) -> Result<Credentials, String> {
        Ok(Credentials {
            id: Id::from_str(&self.rbid)?,
            password: Password::from_str(&self.password)?,
        })
    }
}

/// メトリクスの数値の型。EDT先頭からビッグエンディアンで読む。
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum FieldKind {
    I8,
    I16,
    I32,
    U8,
    U16,
    U32,
}

impl FieldKind {
    pub fn width(&self) -> usize {
        match self {
            Self::I8 | Self::U8 => 1,
            Self::I16 | Self::U16 => 2,
            Self::I32 | Self::U32 => 4,
        }
    }

    /// width()バイトのスライスから読み出す
    pub fn read(&self, bytes: &[u8]) -> i64 {
        match self {
            Self::I8 => i8::from_be_bytes([bytes[0]]) as i64,
            Self::I16 => i16::from_be_bytes([bytes[0], bytes[1]]) as i64,
            Self::I32 => i32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as i64,
            Self::U8 => bytes[0] as i64,
            Self::U16 => u16::from_be_bytes([bytes[0], bytes[1]]) as i64,
            Self::U32 => u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as i64,
        }
    }
}

/// プロパティ内の1フィールドの読み出しかた
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct FieldLayout {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: FieldKind,
}

/// 公開するメトリクスとEPCの対応
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Measure {
    pub name: String,
    #[serde(default)]
    pub help: Option<String>,
    pub epc: u8,
    #[serde(default)]
    pub layout: Vec<FieldLayout>,
}

impl Measure {
    /// レイアウト省略時はメトリクス名のi32一つ
    pub fn layouts(&self) -> Vec<FieldLayout> {
        if self.layout.is_empty() {
            vec![FieldLayout {
                name: self.name.clone(),
                kind: FieldKind::I32,
            }]
        } else {
            self.layout.clone()
        }
    }
}

/// 設定ファイル
#[derive(Serialize, Deserialize, Debug)]
pub struct Settings {
    pub device: String,
    #[serde(default = "default_baud")]
    pub baud: u32,
    #[serde(default = "default_listen")]
    pub listen: String,
    #[serde(default)]
    pub credentials: Option<CredentialSettings>,
    #[serde(default = "default_scan_channel_mask")]
    pub scan_channel_mask: u32,
    #[serde(default = "default_scan_duration")]
    pub scan_duration: u8,
    #[serde(default = "default_target_object")]
    pub target_object: Eoj,
    #[serde(default)]
    pub measures: Vec<Measure>,
    #[serde(default = "default_recv_timeout_ms")]
    pub recv_timeout_ms: i32,
}

impl Settings {
    pub fn from_toml(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }
}

#[test]
fn test1() {
    let text = r#"
device = "/dev/ttyUSB0"

[credentials]
rbid = "00112233445566778899AABBCCDDEEFF"
password = "0123456789AB"

[[measures]]
name = "smartmeter_instant_power_watts"
help = "instantious electric power"
epc = 0xE7

[[measures]]
name = "smartmeter_instant_current_deciamperes"
epc = 0xE8
layout = [
    { name = "smartmeter_instant_current_r_deciamperes", type = "i16" },
    { name = "smartmeter_instant_current_t_deciamperes", type = "i16" },
]
"#;
    let settings = Settings::from_toml(text).unwrap();
    assert_eq!(settings.device, "/dev/ttyUSB0");
    // 既定値
    assert_eq!(settings.baud, 115200);
    assert_eq!(settings.listen, "0.0.0.0:9863");
    assert_eq!(settings.scan_channel_mask, 0xFFFFFFFF);
    assert_eq!(settings.scan_duration, 6);
    assert_eq!(settings.recv_timeout_ms, 5000);
    assert_eq!(settings.target_object, default_target_object());

    settings
        .credentials
        .as_ref()
        .unwrap()
        .to_credentials()
        .unwrap();

    assert_eq!(settings.measures.len(), 2);
    assert_eq!(settings.measures[0].epc, 0xe7);
    // レイアウト省略時の既定
    let layouts = settings.measures[0].layouts();
    assert_eq!(layouts.len(), 1);
    assert_eq!(layouts[0].name, "smartmeter_instant_power_watts");
    assert_eq!(layouts[0].kind, FieldKind::I32);

    let layouts = settings.measures[1].layouts();
    assert_eq!(layouts.len(), 2);
    assert_eq!(layouts[1].kind, FieldKind::I16);
}

#[test]
fn test2() {
    // 不正な認証情報は弾く
    let bad = CredentialSettings {
        rbid: "too short".to_owned(),
        password: "0123456789AB".to_owned(),
    };
    assert!(bad.to_credentials().is_err());

    let bad = CredentialSettings {
        rbid: "00112233445566778899AABBCCDDEEFF".to_owned(),
        password: "".to_owned(),
    };
    assert!(bad.to_credentials().is_err());
}

#[test]
fn test3() {
    assert_eq!(FieldKind::I8.read(&[0xff]), -1);
    assert_eq!(FieldKind::U8.read(&[0xff]), 255);
    assert_eq!(FieldKind::I16.read(&[0x80, 0x00]), -32768);
    assert_eq!(FieldKind::U16.read(&[0x80, 0x00]), 32768);
    assert_eq!(FieldKind::I32.read(&[0x00, 0x00, 0x01, 0x2c]), 300);
    assert_eq!(FieldKind::I32.read(&[0xff, 0xff, 0xff, 0xff]), -1);
    assert_eq!(FieldKind::U32.read(&[0xff, 0xff, 0xff, 0xff]), 4294967295);
}
