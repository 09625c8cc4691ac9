// SKSTACK/IPの応答とイベント
// SPDX-License-Identifier: MPL-2.0
// SPDX-FileCopyrightText: 2025 Akihiro Yamamoto <github.com/ak1211>
//
use std::fmt;
use std::net::Ipv6Addr;
use thiserror::Error;

/// 無線インターフェース面
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    B = 0, // Wi-SUN(スマートメーター側)
    H = 1, // HAN側
}

impl TryFrom<u8> for Side {
    type Error = u8;

    fn try_from(n: u8) -> Result<Self, u8> {
        match n {
            0 => Ok(Self::B),
            1 => Ok(Self::H),
            _ => Err(n),
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", *self as u8)
    }
}

/// SKSCANのスキャンモード
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanMode {
    Ed = 0,              // EDスキャン
    ActiveWithIe = 2,    // IEありアクティブスキャン
    ActiveWithoutIe = 3, // IEなしアクティブスキャン
}

impl fmt::Display for ScanMode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", *self as u8)
    }
}

/// SKSENDTOの暗号化指定
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecurityMode {
    Plain = 0,             // 平文
    Encrypted = 1,         // 暗号化必須
    EncryptedFallback = 2, // 暗号化優先
}

impl fmt::Display for SecurityMode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", *self as u8)
    }
}

/// SKSREGで設定する仮想レジスタ名
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SRegister {
    S02, // 論理チャンネル番号
    S03, // PAN ID
    S07,
    S0A,
    S0B,
    S15,
    S16, // PANAセッションライフタイム
    S17,
    S1C,
    SA1,
    SA2,
    SA9,
    SF0,
    SFB,
    SFD,
    SFE, // コマンドエコーバック
    SFF,
}

impl SRegister {
    pub fn name(&self) -> &'static str {
        match self {
            Self::S02 => "S02",
            Self::S03 => "S03",
            Self::S07 => "S07",
            Self::S0A => "S0A",
            Self::S0B => "S0B",
            Self::S15 => "S15",
            Self::S16 => "S16",
            Self::S17 => "S17",
            Self::S1C => "S1C",
            Self::SA1 => "SA1",
            Self::SA2 => "SA2",
            Self::SA9 => "SA9",
            Self::SF0 => "SF0",
            Self::SFB => "SFB",
            Self::SFD => "SFD",
            Self::SFE => "SFE",
            Self::SFF => "SFF",
        }
    }
}

impl fmt::Display for SRegister {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// FAIL ERxxのエラー種別
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ErrorKind {
    #[error("ER04 サポートされていないコマンド")]
    CommandNotSupported,
    #[error("ER05 引数が不正")]
    InvalidArgument,
    #[error("ER06 形式または値域が不正")]
    InvalidFormatOrOutOfRange,
    #[error("ER09 UART入力エラー")]
    UartInputError,
    #[error("ER10 コマンド実行に失敗した")]
    ExecutionFailed,
    #[error("ER{0:02X} 予約されたエラーコード")]
    Reserved(u8),
}

impl ErrorKind {
    pub fn from_code(code: u8) -> Self {
        match code {
            0x04 => Self::CommandNotSupported,
            0x05 => Self::InvalidArgument,
            0x06 => Self::InvalidFormatOrOutOfRange,
            0x09 => Self::UartInputError,
            0x10 => Self::ExecutionFailed,
            n => Self::Reserved(n),
        }
    }
}

/// コマンドの実行結果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultCode {
    Ok,
    Fail(ErrorKind),
}

/// EVENT行
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    pub num: u8,           // イベント番号
    pub sender: Ipv6Addr,  // 発生元IPv6アドレス
    pub side: Side,        // 発生した面
    pub param: Option<u8>, // num ∈ {0x21, 0x45} のときのみ
}

impl Event {
    /// イベント番号の意味
    pub fn describe(&self) -> &'static str {
        match self.num {
            0x01 => "NS を受信した",
            0x02 => "NA を受信した",
            0x05 => "Echo Request を受信した",
            0x1f => "ED スキャンが完了した",
            0x20 => "Beacon を受信した",
            0x21 if Some(0) == self.param => "UDP の送信に成功",
            0x21 if Some(1) == self.param => "UDP の送信に失敗",
            0x21 => "UDP の送信処理が完了した",
            0x22 => "アクティブスキャンが完了した",
            0x24 => "PANA による接続過程でエラーが発生した（接続が完了しなかった）",
            0x25 => "PANA による接続が完了した",
            0x26 => "接続相手からセッション終了要求を受信した",
            0x27 => "PANA セッションの終了に成功した",
            0x28 => "PANA セッションの終了要求がタイムアウトした（セッションは終了）",
            0x29 => "セッションのライフタイムが経過して期限切れになった",
            0x32 => "ARIB108 の送信総和時間の制限が発動した",
            0x33 => "送信総和時間の制限が解除された",
            _ => "不明なイベント",
        }
    }
}

/// アクティブスキャンで発見したコーディネータ
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Epandesc {
    pub channel: u8,
    pub channel_page: u8,
    pub pan_id: u16,
    pub addr: [u8; 8], // 64ビットMACアドレス
    pub lqi: u8,
    pub side: Side,
    pub pair_id: [u8; 8], // 印字可能8文字
}

/// 受信したUDPデータグラム
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Erxudp {
    pub sender: Ipv6Addr,      // 送信元IPv6アドレス
    pub destination: Ipv6Addr, // 送信先IPv6アドレス
    pub sender_port: u16,      // 送信元UDPポート番号
    pub destination_port: u16, // 送信先UDPポート番号
    pub sender_lla: [u8; 8],   // 送信元のMAC層アドレス
    pub secured: bool,         // 暗号化あり/なし
    pub side: Side,            // 受信した面
    pub data: Vec<u8>,         // 受信データ(ヘッダの宣言長と一致)
}

/// 非同期イベント
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkEvent {
    Event(Event),       // EVENT受信
    Epandesc(Epandesc), // EPANDESC受信
    Erxudp(Erxudp),     // ERXUDP受信
}
