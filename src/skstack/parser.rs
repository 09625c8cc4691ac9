// SKSTACK/IPの応答パーサー
// SPDX-License-Identifier: MPL-2.0
// SPDX-FileCopyrightText: 2025 Akihiro Yamamoto <github.com/ak1211>
//
use crate::skstack::event::{Epandesc, ErrorKind, Event, Side};
use nom::Parser;
use nom::bytes::complete::{tag, take_while_m_n};
use nom::character::complete::{crlf, hex_digit1, space1};
use nom::combinator::{map, map_res, opt};
use nom::multi::separated_list1;
use nom::sequence::preceded;
use std::net::Ipv6Addr;

// 8ビット16進数(任意桁)
fn u8_hex_digit(input: &str) -> nom::IResult<&str, u8> {
    map_res(hex_digit1, |hexd| u8::from_str_radix(hexd, 16)).parse(input)
}

// 8ビット16進数(2桁固定)
fn u8_hex_digit2(input: &str) -> nom::IResult<&str, u8> {
    map_res(take_while_m_n(2, 2, |c: char| c.is_ascii_hexdigit()), |s| {
        u8::from_str_radix(s, 16)
    })
    .parse(input)
}

// 16ビット16進数(任意桁)
fn u16_hex_digit(input: &str) -> nom::IResult<&str, u16> {
    map_res(hex_digit1, |hexd| u16::from_str_radix(hexd, 16)).parse(input)
}

// 64ビット16進数(16桁固定)
fn u64_hex_digit16(input: &str) -> nom::IResult<&str, [u8; 8]> {
    map_res(take_while_m_n(16, 16, |c: char| c.is_ascii_hexdigit()), |s| {
        u64::from_str_radix(s, 16).map(|n| n.to_be_bytes())
    })
    .parse(input)
}

// インターフェース面(1桁)
fn side_digit(input: &str) -> nom::IResult<&str, Side> {
    map_res(u8_hex_digit, Side::try_from).parse(input)
}

// Ipv6アドレス(FE80:0000:0000:0000:0000:0000:0000:0000)
pub fn ipv6addr(s: &str) -> nom::IResult<&str, Ipv6Addr> {
    let parser = separated_list1(tag(":"), hex_digit1);
    map_res(parser, |xs: Vec<&str>| xs.join(":").parse::<Ipv6Addr>()).parse(s)
}

/// FAIL ERxx\r\n
pub fn rx_fail(input: &str) -> nom::IResult<&str, ErrorKind> {
    let parser = (tag("FAIL ER"), u8_hex_digit2, crlf);
    map(parser, |(_tag, code, _crlf)| ErrorKind::from_code(code)).parse(input)
}

/// EVENT xx FE80:0000:0000:0000:0000:0000:0000:0000 y [zz]\r\n
pub fn rx_event(s: &str) -> nom::IResult<&str, Event> {
    let (s, _) = tag("EVENT").parse(s)?;
    let (s, _) = space1.parse(s)?;
    let (s, num) = u8_hex_digit.parse(s)?;
    let (s, _) = space1.parse(s)?;
    let (s, sender) = ipv6addr.parse(s)?;
    let (s, _) = space1.parse(s)?;
    let (s, side) = side_digit.parse(s)?;
    let (s, param) = opt(preceded(space1, u8_hex_digit)).parse(s)?;
    let (s, _) = crlf.parse(s)?;
    // パラメータが付くのは 0x21 と 0x45 だけ
    if matches!(num, 0x21 | 0x45) != param.is_some() {
        return Err(nom::Err::Error(nom::error::Error::new(
            s,
            nom::error::ErrorKind::Verify,
        )));
    }
    Ok((
        s,
        Event {
            num,
            sender,
            side,
            param,
        },
    ))
}

/// EPANDESCブロック(プロパティ7行)
pub fn rx_epandesc(s: &str) -> nom::IResult<&str, Epandesc> {
    // 1行目
    let (s, _) = (tag("EPANDESC"), crlf).parse(s)?;
    // 2行目
    let (s, _) = tag("  ").parse(s)?;
    let (s, channel) = map((tag("Channel:"), u8_hex_digit, crlf), |(_, n, _)| n).parse(s)?;
    // 3行目
    let (s, _) = tag("  ").parse(s)?;
    let (s, channel_page) =
        map((tag("Channel Page:"), u8_hex_digit, crlf), |(_, n, _)| n).parse(s)?;
    // 4行目
    let (s, _) = tag("  ").parse(s)?;
    let (s, pan_id) = map((tag("Pan ID:"), u16_hex_digit, crlf), |(_, n, _)| n).parse(s)?;
    // 5行目
    let (s, _) = tag("  ").parse(s)?;
    let (s, (_, addr, _)) = (tag("Addr:"), u64_hex_digit16, crlf).parse(s)?;
    // 6行目
    let (s, _) = tag("  ").parse(s)?;
    let (s, lqi) = map((tag("LQI:"), u8_hex_digit, crlf), |(_, n, _)| n).parse(s)?;
    // 7行目
    let (s, _) = tag("  ").parse(s)?;
    let (s, side) = map((tag("Side:"), side_digit, crlf), |(_, n, _)| n).parse(s)?;
    // 8行目
    let (s, _) = tag("  ").parse(s)?;
    let (s, pair_id) = map_res(
        (
            tag("PairID:"),
            take_while_m_n(8, 8, |c: char| c.is_ascii_graphic()),
            crlf,
        ),
        |(_, id, _): (_, &str, _)| id.as_bytes().try_into(),
    )
    .parse(s)?;

    Ok((
        s,
        Epandesc {
            channel,
            channel_page,
            pan_id,
            addr,
            lqi,
            side,
            pair_id,
        },
    ))
}

/// ERXUDPのヘッダ部(データ長まで。ペイロードはドライバーが読む)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErxudpHeader {
    pub sender: Ipv6Addr,
    pub destination: Ipv6Addr,
    pub sender_port: u16,
    pub destination_port: u16,
    pub sender_lla: [u8; 8],
    pub secured: bool,
    pub side: Side,
    pub datalen: u16,
}

pub fn erxudp_header(s: &str) -> nom::IResult<&str, ErxudpHeader> {
    // 送信元アドレス
    let (s, sender) = ipv6addr.parse(s)?;
    let (s, _) = space1.parse(s)?;
    // 送信先アドレス
    let (s, destination) = ipv6addr.parse(s)?;
    let (s, _) = space1.parse(s)?;
    // 送信元ポート番号
    let (s, sender_port) = u16_hex_digit.parse(s)?;
    let (s, _) = space1.parse(s)?;
    // 送信先ポート番号
    let (s, destination_port) = u16_hex_digit.parse(s)?;
    let (s, _) = space1.parse(s)?;
    // 送信元のMAC層アドレス
    let (s, sender_lla) = u64_hex_digit16.parse(s)?;
    let (s, _) = space1.parse(s)?;
    // 暗号化あり/なし
    let (s, secured) = map(u8_hex_digit, |n| n != 0).parse(s)?;
    let (s, _) = space1.parse(s)?;
    // 受信した面
    let (s, side) = side_digit.parse(s)?;
    let (s, _) = space1.parse(s)?;
    // 受信したデータの長さ
    let (s, datalen) = u16_hex_digit.parse(s)?;

    Ok((
        s,
        ErxudpHeader {
            sender,
            destination,
            sender_port,
            destination_port,
            sender_lla,
            secured,
            side,
            datalen,
        },
    ))
}

#[test]
fn test1() {
    assert_eq!(
        rx_fail("FAIL ER10\r\n").unwrap(),
        ("", ErrorKind::ExecutionFailed)
    );
    assert_eq!(
        rx_fail("FAIL ER05\r\n").unwrap(),
        ("", ErrorKind::InvalidArgument)
    );
    assert_eq!(
        rx_fail("FAIL ERFF\r\n").unwrap(),
        ("", ErrorKind::Reserved(0xff))
    );

    assert_eq!(
        u64_hex_digit16("0000000000000001").unwrap(),
        ("", [0, 0, 0, 0, 0, 0, 0, 1])
    );
    assert_eq!(
        u64_hex_digit16("FFFFFFFFFFFFFFFF").unwrap(),
        ("", [0xff; 8])
    );
}

#[test]
fn test2() {
    let sender = "FE80:0000:0000:0000:0000:0000:0000:0000";

    assert_eq!(
        rx_event(&format!("EVENT 02 {} 0\r\n", sender)).unwrap(),
        (
            "",
            Event {
                num: 2,
                sender: sender.parse().unwrap(),
                side: Side::B,
                param: None,
            }
        )
    );

    assert_eq!(
        rx_event(&format!("EVENT 21 {} 1 02\r\n", sender)).unwrap(),
        (
            "",
            Event {
                num: 33,
                sender: sender.parse().unwrap(),
                side: Side::H,
                param: Some(2),
            }
        )
    );

    // 0x21と0x45以外にパラメータが付くのは不正
    assert!(rx_event(&format!("EVENT 20 {} 0 02\r\n", sender)).is_err());
    // 0x21にパラメータがないのも不正
    assert!(rx_event(&format!("EVENT 21 {} 0\r\n", sender)).is_err());
}

#[test]
fn test3() {
    let header = "FE80:0001:0002:0003:0004:0005:0006:0007 \
                  FE80:0008:0009:000A:000B:000C:000D:000E \
                  0E1A 0E1A 123456789ABC0000 1 0 0010";

    assert_eq!(
        erxudp_header(header).unwrap(),
        (
            "",
            ErxudpHeader {
                sender: "FE80:0001:0002:0003:0004:0005:0006:0007".parse().unwrap(),
                destination: "FE80:0008:0009:000a:000b:000c:000d:000e".parse().unwrap(),
                sender_port: 0x0e1a,
                destination_port: 0x0e1a,
                sender_lla: 0x1234_5678_9abc_0000u64.to_be_bytes(),
                secured: true,
                side: Side::B,
                datalen: 16,
            }
        )
    );
}

#[test]
fn test4() {
    let epandesc = vec![
        "EPANDESC\r\n",
        "  Channel:3B\r\n",
        "  Channel Page:09\r\n",
        "  Pan ID:ABCD\r\n",
        "  Addr:12345678ABCDABCD\r\n",
        "  LQI:84\r\n",
        "  Side:0\r\n",
        "  PairID:1234ABCD\r\n",
    ];

    assert_eq!(
        rx_epandesc(&epandesc.concat()).unwrap(),
        (
            "",
            Epandesc {
                channel: 59,
                channel_page: 9,
                pan_id: 0xABCD,
                addr: 0x1234_5678_ABCD_ABCDu64.to_be_bytes(),
                lqi: 132,
                side: Side::B,
                pair_id: *b"1234ABCD",
            }
        ),
    );
}
