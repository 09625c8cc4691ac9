// SKSTACK/IPモデムドライバー
// SPDX-License-Identifier: MPL-2.0
// SPDX-FileCopyrightText: 2025 Akihiro Yamamoto <github.com/ak1211>
//
use crate::lineport::{LinePort, Poll, RawPort};
use crate::skstack::command;
use crate::skstack::event::{
    Epandesc, ErrorKind, Erxudp, ResultCode, SRegister, ScanMode, SecurityMode, Side, SkEvent,
};
use crate::skstack::parser;
use std::collections::VecDeque;
use std::io;
use std::net::Ipv6Addr;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ModemError {
    #[error("i/o")]
    Io(#[from] io::Error),
    #[error("ポートが切断された")]
    Disconnected,
    #[error("コマンド実行に失敗した。{0}")]
    Command(ErrorKind),
    #[error("解釈できない応答: {0}")]
    Malformed(String),
}

/// モデムドライバー。コマンド結果と非同期イベントを同じワイヤからより分ける。
pub struct SkModem<P> {
    pub port: LinePort<P>,
    events: VecDeque<SkEvent>,
}

impl<P: RawPort> SkModem<P> {
    pub fn new(port: LinePort<P>) -> Self {
        Self {
            port,
            events: VecDeque::new(),
        }
    }

    /// コマンドを送信する
    fn send(&mut self, command: &[u8]) -> Result<(), ModemError> {
        let s = command
            .iter()
            .map(|n| *n as char)
            .filter(|c| c.is_ascii())
            .collect::<String>();
        tracing::trace!(target: "Tx->", "{}", s.escape_debug());
        Ok(self.port.write_all(command)?)
    }

    // 1バイト読む。ポート自体のタイムアウトは無視して読み続ける。
    fn read_byte(&mut self) -> Result<u8, ModemError> {
        let mut buf = [0u8; 1];
        loop {
            match self.port.read(&mut buf) {
                Ok(0) => return Err(ModemError::Disconnected),
                Ok(_) => return Ok(buf[0]),
                Err(e) if e.kind() == io::ErrorKind::TimedOut => continue,
                Err(e) => return Err(ModemError::Io(e)),
            }
        }
    }

    fn read_exact(&mut self, buf: &mut [u8]) -> Result<(), ModemError> {
        for slot in buf.iter_mut() {
            *slot = self.read_byte()?;
        }
        Ok(())
    }

    // 行頭トークン(スペースまたはCRまで)を読む。(トークン, 区切りバイト)を返す。
    fn read_token(&mut self) -> Result<(Vec<u8>, u8), ModemError> {
        let mut token = Vec::new();
        loop {
            match self.read_byte()? {
                b @ (b' ' | b'\r') => return Ok((token, b)),
                b => token.push(b),
            }
        }
    }

    // 行の残り(CRLFまで、CRLFは含まない)を読む
    fn read_rest_of_line(&mut self) -> Result<Vec<u8>, ModemError> {
        let mut line = Vec::new();
        loop {
            match self.read_byte()? {
                b'\r' => {
                    self.expect_lf()?;
                    return Ok(line);
                }
                b => line.push(b),
            }
        }
    }

    fn expect_lf(&mut self) -> Result<(), ModemError> {
        match self.read_byte()? {
            b'\n' => Ok(()),
            other => Err(ModemError::Malformed(format!(
                "CRの後に0x{:02X}を受信した",
                other
            ))),
        }
    }

    /// コマンドを1行送って結果を待つ
    pub fn execute(&mut self, command: &[u8]) -> Result<(), ModemError> {
        self.send(command)?;
        match self.wait_result()? {
            ResultCode::Ok => Ok(()),
            ResultCode::Fail(kind) => Err(ModemError::Command(kind)),
        }
    }

    // 結果コード待ちループ。途中に届いたイベントはキューへ積む。
    fn wait_result(&mut self) -> Result<ResultCode, ModemError> {
        loop {
            let (token, delim) = self.read_token()?;
            match token.as_slice() {
                // FIXME: モデムがまれに結果コードの前に素のCRLFを挟んでくる
                b"" if delim == b'\r' => {
                    self.expect_lf()?;
                    tracing::warn!("結果コードの前に余分なCRLFを受信した");
                }
                b"OK" if delim == b'\r' => {
                    self.expect_lf()?;
                    tracing::trace!(target: "<-Rx", "OK");
                    return Ok(ResultCode::Ok);
                }
                b"FAIL" if delim == b' ' => {
                    let rest = self.read_rest_of_line()?;
                    let line = format!("FAIL {}\r\n", String::from_utf8_lossy(&rest));
                    tracing::trace!(target: "<-Rx", "{}", line.escape_debug());
                    let (_, kind) = parser::rx_fail(&line)
                        .map_err(|e| ModemError::Malformed(e.to_string()))?;
                    return Ok(ResultCode::Fail(kind));
                }
                head if head.first() == Some(&b'E') => {
                    // 非同期イベント。読んだ分を押し戻してイベントとして取り出す。
                    self.port.unread(&[head, &[delim][..]].concat());
                    let event = self.read_event()?;
                    self.events.push_back(event);
                }
                head if head.starts_with(b"SK") => {
                    // エコーバックされたコマンド行(SKSREG SFE 0が効く前)。読み捨てる。
                    tracing::debug!(
                        "エコーバックを読み捨てた: {}",
                        String::from_utf8_lossy(head)
                    );
                    if delim == b' ' {
                        let _ = self.read_rest_of_line()?;
                    } else {
                        self.expect_lf()?;
                    }
                }
                head => {
                    return Err(ModemError::Malformed(format!(
                        "結果コードを期待したが \"{}\" を受信した",
                        String::from_utf8_lossy(head)
                    )));
                }
            }
        }
    }

    // SKLL64はOKではなくアドレス行を返す
    fn wait_address(&mut self) -> Result<Ipv6Addr, ModemError> {
        loop {
            let (token, delim) = self.read_token()?;
            match token.as_slice() {
                b"" if delim == b'\r' => {
                    self.expect_lf()?;
                    tracing::warn!("アドレス行の前に余分なCRLFを受信した");
                }
                head if head.first() == Some(&b'E') => {
                    self.port.unread(&[head, &[delim][..]].concat());
                    let event = self.read_event()?;
                    self.events.push_back(event);
                }
                head if head.starts_with(b"SK") => {
                    tracing::debug!(
                        "エコーバックを読み捨てた: {}",
                        String::from_utf8_lossy(head)
                    );
                    if delim == b' ' {
                        let _ = self.read_rest_of_line()?;
                    } else {
                        self.expect_lf()?;
                    }
                }
                head if delim == b'\r' => {
                    self.expect_lf()?;
                    let text = String::from_utf8_lossy(head).into_owned();
                    tracing::trace!(target: "<-Rx", "{}", text);
                    match parser::ipv6addr(&text) {
                        Ok(("", addr)) => return Ok(addr),
                        _ => {
                            return Err(ModemError::Malformed(format!(
                                "IPv6アドレスを期待したが \"{}\" を受信した",
                                text
                            )));
                        }
                    }
                }
                head => {
                    return Err(ModemError::Malformed(format!(
                        "IPv6アドレスを期待したが \"{}\" を受信した",
                        String::from_utf8_lossy(head)
                    )));
                }
            }
        }
    }

    // イベント1件をワイヤから読む
    fn read_event(&mut self) -> Result<SkEvent, ModemError> {
        loop {
            let (token, delim) = self.read_token()?;
            match token.as_slice() {
                // 空行は読み飛ばす
                b"" if delim == b'\r' => {
                    self.expect_lf()?;
                }
                b"EVENT" if delim == b' ' => {
                    let rest = self.read_rest_of_line()?;
                    let line = format!("EVENT {}\r\n", String::from_utf8_lossy(&rest));
                    tracing::trace!(target: "<-Rx", "{}", line.escape_debug());
                    let (_, event) = parser::rx_event(&line)
                        .map_err(|e| ModemError::Malformed(e.to_string()))?;
                    return Ok(SkEvent::Event(event));
                }
                b"EPANDESC" if delim == b'\r' => {
                    self.expect_lf()?;
                    // プロパティ7行を読み足してブロックごと解析する
                    let mut block = "EPANDESC\r\n".to_string();
                    for _ in 0..7 {
                        let line = self.read_rest_of_line()?;
                        block.push_str(&String::from_utf8_lossy(&line));
                        block.push_str("\r\n");
                    }
                    tracing::trace!(target: "<-Rx", "{}", block.escape_debug());
                    let (_, epandesc) = parser::rx_epandesc(&block)
                        .map_err(|e| ModemError::Malformed(e.to_string()))?;
                    return Ok(SkEvent::Epandesc(epandesc));
                }
                b"ERXUDP" if delim == b' ' => {
                    return self.read_erxudp().map(SkEvent::Erxudp);
                }
                // コマンド結果待ちの外で届いた結果コードは読み捨てる
                b"OK" if delim == b'\r' => {
                    self.expect_lf()?;
                    tracing::trace!(target: "<-Rx", "OK");
                }
                head if head.starts_with(b"SK") => {
                    tracing::debug!(
                        "エコーバックを読み捨てた: {}",
                        String::from_utf8_lossy(head)
                    );
                    if delim == b' ' {
                        let _ = self.read_rest_of_line()?;
                    } else {
                        self.expect_lf()?;
                    }
                }
                head => {
                    return Err(ModemError::Malformed(format!(
                        "イベントを期待したが \"{}\" を受信した",
                        String::from_utf8_lossy(head)
                    )));
                }
            }
        }
    }

    // ERXUDPのヘッダ8フィールドとバイナリペイロードを読む
    fn read_erxudp(&mut self) -> Result<Erxudp, ModemError> {
        let mut fields = Vec::with_capacity(8);
        for _ in 0..8 {
            let (token, delim) = self.read_token()?;
            if delim != b' ' {
                return Err(ModemError::Malformed(
                    "ERXUDPのヘッダフィールドが足りない".to_owned(),
                ));
            }
            fields.push(String::from_utf8_lossy(&token).into_owned());
        }
        // フィールド幅はファームウェアで固定。不一致はバージョン違い。
        let widths = [39, 39, 4, 4, 16, 1, 1, 4];
        for (field, width) in fields.iter().zip(widths) {
            assert_eq!(
                field.len(),
                width,
                "ERXUDPのフィールド幅が不正: \"{}\"",
                field
            );
        }
        let header_line = fields.join(" ");
        let (_, header) = parser::erxudp_header(&header_line)
            .map_err(|e| ModemError::Malformed(e.to_string()))?;

        // 宣言された長さちょうどの生ペイロード
        let mut data = vec![0u8; header.datalen as usize];
        self.read_exact(&mut data)?;
        if self.read_byte()? != b'\r' {
            return Err(ModemError::Malformed(
                "ERXUDPのペイロード終端がCRLFでない".to_owned(),
            ));
        }
        self.expect_lf()?;
        tracing::trace!(target: "<-Rx", "ERXUDP {} ({}バイト)", header_line, data.len());

        Ok(Erxudp {
            sender: header.sender,
            destination: header.destination,
            sender_port: header.sender_port,
            destination_port: header.destination_port,
            sender_lla: header.sender_lla,
            secured: header.secured,
            side: header.side,
            data,
        })
    }

    /// キューの先頭、なければtimeout_msまで待ってワイヤから次のイベントを返す
    pub fn poll_event(&mut self, timeout_ms: i32) -> Result<Option<SkEvent>, ModemError> {
        if let Some(event) = self.events.pop_front() {
            return Ok(Some(event));
        }
        match self.port.poll(timeout_ms)? {
            Poll::Timeout => Ok(None),
            Poll::Disconnected => Err(ModemError::Disconnected),
            // ReadReadyはヒントなのでここから先は読み切るまでブロックする
            Poll::ReadReady => self.read_event().map(Some),
        }
    }

    /// 次のイベントを無期限に待つ
    pub fn wait_event(&mut self) -> Result<SkEvent, ModemError> {
        match self.poll_event(-1)? {
            Some(event) => Ok(event),
            None => Err(ModemError::Disconnected),
        }
    }

    /// 次にワイヤへ現れる構造をEPANDESCとして直接読む(キューは経由しない)
    pub fn wait_epandesc(&mut self) -> Result<Epandesc, ModemError> {
        match self.read_event()? {
            SkEvent::Epandesc(epandesc) => Ok(epandesc),
            other => Err(ModemError::Malformed(format!(
                "EPANDESCを期待したが{:?}を受信した",
                other
            ))),
        }
    }

    /// リセット
    pub fn skreset(&mut self) -> Result<(), ModemError> {
        self.execute(command::skreset().as_bytes())
    }

    /// 仮想レジスタ書き込み
    pub fn sksreg(&mut self, register: SRegister, value: &str) -> Result<(), ModemError> {
        self.execute(command::sksreg(register, value).as_bytes())
    }

    /// ルートB IDを登録する
    pub fn sksetrbid(&mut self, id: &str) -> Result<(), ModemError> {
        self.execute(command::sksetrbid(id).as_bytes())
    }

    /// ルートBパスワードを登録する
    pub fn sksetpwd(&mut self, password: &str) -> Result<(), ModemError> {
        self.execute(command::sksetpwd(password).as_bytes())
    }

    /// アクティブスキャン開始。結果はイベントで届く。
    pub fn skscan(
        &mut self,
        mode: ScanMode,
        channel_mask: u32,
        duration: u8,
        side: Side,
    ) -> Result<(), ModemError> {
        self.execute(command::skscan(mode, channel_mask, duration, side).as_bytes())
    }

    /// 64ビットMACアドレスをIPv6リンクローカルアドレスへ変換する
    pub fn skll64(&mut self, addr: &[u8; 8]) -> Result<Ipv6Addr, ModemError> {
        self.send(command::skll64(addr).as_bytes())?;
        self.wait_address()
    }

    /// PANA認証開始。完了はイベントで届く。
    pub fn skjoin(&mut self, addr: &Ipv6Addr) -> Result<(), ModemError> {
        self.execute(command::skjoin(addr).as_bytes())
    }

    /// UDPデータグラム送信
    pub fn sksendto(
        &mut self,
        handle: u8,
        addr: &Ipv6Addr,
        port: u16,
        security: SecurityMode,
        side: Side,
        payload: &[u8],
    ) -> Result<(), ModemError> {
        self.execute(&command::sksendto(handle, addr, port, security, side, payload))
    }

    /// PANAセッション終了
    pub fn skterm(&mut self) -> Result<(), ModemError> {
        self.execute(command::skterm().as_bytes())
    }
}

#[cfg(test)]
fn modem_with(script: &[u8]) -> SkModem<crate::lineport::mock::MockPort> {
    let mut port = crate::lineport::mock::MockPort::new();
    port.push_rx(script);
    SkModem::new(LinePort::new(port))
}

#[test]
fn test1() {
    // コマンドと結果の往復
    let mut modem = modem_with(b"OK\r\n");
    modem.skreset().unwrap();
    assert_eq!(modem.port.get_ref().tx, b"SKRESET\r\n");

    let mut modem = modem_with(b"FAIL ER04\r\n");
    match modem.sksreg(SRegister::S02, "21") {
        Err(ModemError::Command(ErrorKind::CommandNotSupported)) => {}
        other => panic!("{:?}", other),
    }
    assert_eq!(modem.port.get_ref().tx, b"SKSREG S02 21\r\n");

    let mut modem = modem_with(b"OK\r\n");
    modem.sksetpwd("0123456789AB").unwrap();
    assert_eq!(modem.port.get_ref().tx, b"SKSETPWD C 0123456789AB\r\n");

    let mut modem = modem_with(b"OK\r\n");
    modem
        .skscan(ScanMode::ActiveWithIe, 0xFFFFFFFF, 6, Side::B)
        .unwrap();
    assert_eq!(modem.port.get_ref().tx, b"SKSCAN 2 FFFFFFFF 6 0\r\n");
}

#[test]
fn test2() {
    // 結果待ちの途中に届いたイベントはキューへ積まれて後からpoll_eventで返る
    let sender = "FE80:0000:0000:0000:0000:0000:0000:C890";
    let script = format!("EVENT 1F {} 0\r\nOK\r\n", sender);
    let mut modem = modem_with(script.as_bytes());

    modem.skreset().unwrap();
    match modem.poll_event(0).unwrap() {
        Some(SkEvent::Event(event)) => {
            assert_eq!(event.num, 0x1f);
            assert_eq!(event.sender, sender.parse::<Ipv6Addr>().unwrap());
            assert_eq!(event.param, None);
        }
        other => panic!("{:?}", other),
    }
    assert_eq!(modem.poll_event(0).unwrap(), None);
}

#[test]
fn test3() {
    // 余分なCRLFやエコーバックが結果の前に挟まっても読み飛ばす
    let mut modem = modem_with(b"\r\nOK\r\n");
    modem.skreset().unwrap();

    let mut modem = modem_with(b"SKRESET\r\nOK\r\n");
    modem.skreset().unwrap();
}

#[test]
fn test4() {
    // ERXUDPのペイロードはバイナリ(CRLFを含んでもよい)
    let script = [
        &b"ERXUDP FE80:0000:0000:0000:021D:1290:1234:5678 \
           FE80:0000:0000:0000:0000:0000:0000:0001 \
           0E1A 0E1A 021D129012345678 1 0 0004 "[..],
        &[0x10, 0x81, 0x0d, 0x0a],
        b"\r\n",
    ]
    .concat();
    let mut modem = modem_with(&script);

    match modem.poll_event(0).unwrap() {
        Some(SkEvent::Erxudp(erxudp)) => {
            assert_eq!(
                erxudp.sender,
                "FE80::021D:1290:1234:5678".parse::<Ipv6Addr>().unwrap()
            );
            assert_eq!(erxudp.sender_port, 0x0e1a);
            assert_eq!(erxudp.destination_port, 0x0e1a);
            assert!(erxudp.secured);
            assert_eq!(erxudp.data, vec![0x10, 0x81, 0x0d, 0x0a]);
        }
        other => panic!("{:?}", other),
    }
}

#[test]
fn test5() {
    // SKLL64はアドレス行で応答する
    let mut modem = modem_with(b"FE80:0000:0000:0000:021D:1290:1234:5678\r\n");
    let addr = modem
        .skll64(&[0x12, 0x34, 0x56, 0x78, 0xAB, 0xCD, 0xEF, 0x01])
        .unwrap();
    assert_eq!(addr, "FE80::021D:1290:1234:5678".parse::<Ipv6Addr>().unwrap());
    assert_eq!(modem.port.get_ref().tx, b"SKLL64 12345678ABCDEF01\r\n");
}

#[test]
fn test6() {
    // イベント待ちの最中に届いたEPANDESCブロック
    let block = b"EPANDESC\r\n\
                  \x20 Channel:21\r\n\
                  \x20 Channel Page:09\r\n\
                  \x20 Pan ID:8888\r\n\
                  \x20 Addr:12345678ABCDEF01\r\n\
                  \x20 LQI:E1\r\n\
                  \x20 Side:0\r\n\
                  \x20 PairID:AABBCCDD\r\n";
    let mut modem = modem_with(block);
    match modem.wait_event().unwrap() {
        SkEvent::Epandesc(epandesc) => {
            assert_eq!(epandesc.channel, 0x21);
            assert_eq!(epandesc.pan_id, 0x8888);
            assert_eq!(epandesc.pair_id, *b"AABBCCDD");
        }
        other => panic!("{:?}", other),
    }
}
