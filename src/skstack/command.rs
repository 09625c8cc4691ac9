// SKSTACK/IPのコマンド組み立て
// SPDX-License-Identifier: MPL-2.0
// SPDX-FileCopyrightText: 2025 Akihiro Yamamoto <github.com/ak1211>
//
use crate::skstack::event::{ScanMode, SRegister, SecurityMode, Side};
use std::net::Ipv6Addr;

/// Ipv6アドレスのテキスト表現(4桁16進数8グループ、省略なし)
pub fn ipv6_text(addr: &Ipv6Addr) -> String {
    addr.segments().map(|n| format!("{:04X}", n)).join(":")
}

/// リセット
pub fn skreset() -> String {
    "SKRESET\r\n".to_owned()
}

/// 仮想レジスタ書き込み
pub fn sksreg(register: SRegister, value: &str) -> String {
    format!("SKSREG {} {}\r\n", register, value)
}

/// ルートB IDを登録する
pub fn sksetrbid(id: &str) -> String {
    format!("SKSETRBID {}\r\n", id)
}

/// ルートBパスワードを登録する
pub fn sksetpwd(password: &str) -> String {
    format!("SKSETPWD {:X} {}\r\n", password.len(), password)
}

/// アクティブスキャン
pub fn skscan(mode: ScanMode, channel_mask: u32, duration: u8, side: Side) -> String {
    format!("SKSCAN {} {:08X} {:X} {}\r\n", mode, channel_mask, duration, side)
}

/// 64ビットMACアドレスからIPv6リンクローカルアドレスへ変換する
pub fn skll64(addr: &[u8; 8]) -> String {
    let hex = addr.iter().map(|n| format!("{:02X}", n)).collect::<String>();
    format!("SKLL64 {}\r\n", hex)
}

/// PANA認証開始
pub fn skjoin(addr: &Ipv6Addr) -> String {
    format!("SKJOIN {}\r\n", ipv6_text(addr))
}

/// UDPデータグラム送信。データ長の後ろにバイナリペイロードが続く。
pub fn sksendto(
    handle: u8,
    addr: &Ipv6Addr,
    port: u16,
    security: SecurityMode,
    side: Side,
    payload: &[u8],
) -> Vec<u8> {
    let prefix = format!(
        "SKSENDTO {} {} {:04X} {} {} {:04X} ",
        handle,
        ipv6_text(addr),
        port,
        security,
        side,
        payload.len(),
    );
    let mut command = prefix.into_bytes();
    command.extend_from_slice(payload);
    command.extend_from_slice(b"\r\n");
    command
}

/// PANAセッション終了
pub fn skterm() -> String {
    "SKTERM\r\n".to_owned()
}

#[test]
fn test1() {
    assert_eq!(skreset(), "SKRESET\r\n");
    assert_eq!(sksreg(SRegister::SFE, "0"), "SKSREG SFE 0\r\n");
    assert_eq!(sksreg(SRegister::S02, "21"), "SKSREG S02 21\r\n");
    assert_eq!(sksreg(SRegister::S03, "8888"), "SKSREG S03 8888\r\n");
    assert_eq!(
        sksetrbid("00112233445566778899AABBCCDDEEFF"),
        "SKSETRBID 00112233445566778899AABBCCDDEEFF\r\n"
    );
    assert_eq!(sksetpwd("0123456789AB"), "SKSETPWD C 0123456789AB\r\n");
    assert_eq!(skterm(), "SKTERM\r\n");
}

#[test]
fn test2() {
    assert_eq!(
        skscan(ScanMode::ActiveWithIe, 0xFFFFFFFF, 6, Side::B),
        "SKSCAN 2 FFFFFFFF 6 0\r\n"
    );
    assert_eq!(
        skll64(&[0x12, 0x34, 0x56, 0x78, 0xAB, 0xCD, 0xEF, 0x01]),
        "SKLL64 12345678ABCDEF01\r\n"
    );

    let addr: Ipv6Addr = "FE80::021D:1290:1234:5678".parse().unwrap();
    assert_eq!(
        ipv6_text(&addr),
        "FE80:0000:0000:0000:021D:1290:1234:5678"
    );
    assert_eq!(
        skjoin(&addr),
        "SKJOIN FE80:0000:0000:0000:021D:1290:1234:5678\r\n"
    );
}

#[test]
fn test3() {
    let addr: Ipv6Addr = "FE80::021D:1290:1234:5678".parse().unwrap();
    let command = sksendto(
        1,
        &addr,
        0x0E1A,
        SecurityMode::Encrypted,
        Side::B,
        &[0x10, 0x81, 0x00, 0x01],
    );
    let mut expected =
        b"SKSENDTO 1 FE80:0000:0000:0000:021D:1290:1234:5678 0E1A 1 0 0004 ".to_vec();
    expected.extend_from_slice(&[0x10, 0x81, 0x00, 0x01]);
    expected.extend_from_slice(b"\r\n");
    assert_eq!(command, expected);
}
