// スマートメータールートB接続セッション
// SPDX-License-Identifier: MPL-2.0
// SPDX-FileCopyrightText: 2025 Akihiro Yamamoto <github.com/ak1211>
//
use crate::lineport::RawPort;
use crate::skstack::driver::{ModemError, SkModem};
use crate::skstack::event::{SRegister, ScanMode, SecurityMode, Side, SkEvent};
use std::net::Ipv6Addr;
use thiserror::Error;

/// Echonet liteのUDPポート番号
pub const ECHONET_LITE_PORT: u16 = 0x0e1a;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Modem(#[from] ModemError),
    #[error("コーディネータが見つからなかった")]
    CoordinatorNotFound,
    #[error("PANAによる接続に失敗した")]
    ConnectionFailed,
    #[error("接続していない")]
    NotConnected,
    #[error("すでに接続している")]
    AlreadyConnected,
}

#[derive(PartialEq, Eq, Debug, Clone)]
/// ルートB ID
pub struct Id(String);
impl std::str::FromStr for Id {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() == 32 && s.chars().all(|c| c.is_ascii_hexdigit()) {
            Ok(Self(s.to_owned()))
        } else {
            Err("IDは32桁の16進数です".to_string())
        }
    }
}
impl std::fmt::Display for Id {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(PartialEq, Eq, Debug, Clone)]
/// ルートBパスワード
pub struct Password(String);
impl std::str::FromStr for Password {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if (1..=32).contains(&s.len()) && s.chars().all(|c| c.is_ascii_graphic()) {
            Ok(Self(s.to_owned()))
        } else {
            Err("PASSWORDは印字可能文字1～32文字です".to_string())
        }
    }
}
impl std::fmt::Display for Password {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(PartialEq, Eq)]
/// 認証情報
pub struct Credentials {
    pub id: Id,
    pub password: Password,
}

/// セッション状態
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Disconnected,
    Scanning,
    DescriptorSelected,
    Joining,
    Connected,
    Terminated,
}

/// スキャンから接続確立・接続先との送受信までを面倒見る
pub struct Session<P> {
    pub modem: SkModem<P>,
    state: State,
    remote_addr: Option<Ipv6Addr>,
}

impl<P: RawPort> Session<P> {
    pub fn new(modem: SkModem<P>) -> Self {
        Self {
            modem,
            state: State::Disconnected,
            remote_addr: None,
        }
    }

    pub fn state(&self) -> State {
        self.state
    }

    /// 接続完了後の接続先アドレス
    pub fn remote_addr(&self) -> Option<Ipv6Addr> {
        self.remote_addr
    }

    /// スマートメーターを探して接続する
    pub fn connect(
        &mut self,
        credentials: Option<&Credentials>,
        channel_mask: u32,
        scan_duration: u8,
    ) -> Result<(), Error> {
        if self.state == State::Connected {
            return Err(Error::AlreadyConnected);
        }

        // リセットしてコマンドのエコーバックを無効にする
        self.modem.skreset()?;
        self.modem.sksreg(SRegister::SFE, "0")?;

        // 認証情報を登録する
        if let Some(credentials) = credentials {
            self.modem.sksetrbid(&credentials.id.to_string())?;
            self.modem.sksetpwd(&credentials.password.to_string())?;
        }

        // アクティブスキャン
        self.modem
            .skscan(ScanMode::ActiveWithIe, channel_mask, scan_duration, Side::B)?;
        self.state = State::Scanning;

        // EVENT 20 = beaconを受信した / EVENT 22 = アクティブスキャン終了
        loop {
            match self.modem.wait_event()? {
                SkEvent::Event(event) if event.num == 0x20 => break,
                SkEvent::Event(event) if event.num == 0x22 => {
                    self.state = State::Disconnected;
                    return Err(Error::CoordinatorNotFound);
                }
                SkEvent::Event(event) => {
                    tracing::debug!("スキャン中: {} {:?}", event.describe(), event)
                }
                event => tracing::debug!("スキャン中のイベントを読み飛ばす: {:?}", event),
            }
        }

        // beaconの次にワイヤへ現れる構造は発見したコーディネータの記述
        let epandesc = self.modem.wait_epandesc()?;
        tracing::debug!("{:?}", epandesc);

        // スキャン終了まで待つ。二つ目以降の記述は読み捨てる。
        loop {
            match self.modem.wait_event()? {
                SkEvent::Event(event) if event.num == 0x22 => break,
                event => tracing::debug!("スキャン終了待ちのイベントを読み飛ばす: {:?}", event),
            }
        }
        self.state = State::DescriptorSelected;

        // MACアドレスからIPv6リンクローカルアドレスへ変換する
        let remote_addr = self.modem.skll64(&epandesc.addr)?;

        // 自端末の論理チャンネル番号とPAN IDを相手に合わせる
        self.modem
            .sksreg(SRegister::S02, &format!("{:02X}", epandesc.channel))?;
        self.modem
            .sksreg(SRegister::S03, &format!("{:04X}", epandesc.pan_id))?;

        // PANA認証開始
        self.modem.skjoin(&remote_addr)?;
        self.state = State::Joining;

        // EVENT 24 = PANA接続失敗 / EVENT 25 = PANA接続完了
        loop {
            match self.modem.wait_event()? {
                SkEvent::Event(event) if event.num == 0x24 => {
                    self.state = State::Disconnected;
                    return Err(Error::ConnectionFailed);
                }
                SkEvent::Event(event) if event.num == 0x25 => break,
                SkEvent::Event(event) => {
                    tracing::debug!("PANA認証待ち: {} {:?}", event.describe(), event)
                }
                event => tracing::debug!("PANA認証待ちのイベントを読み飛ばす: {:?}", event),
            }
        }

        self.remote_addr = Some(remote_addr);
        self.state = State::Connected;
        tracing::info!("接続完了: {}", remote_addr);
        Ok(())
    }

    /// 接続先へUDPデータグラムを送る
    pub fn send(&mut self, payload: &[u8]) -> Result<(), Error> {
        let remote_addr = self.connected_addr()?;
        self.modem.sksendto(
            1,
            &remote_addr,
            ECHONET_LITE_PORT,
            SecurityMode::Encrypted,
            Side::B,
            payload,
        )?;
        Ok(())
    }

    /// 接続先からのUDPデータグラムを待つ。Noneはタイムアウト。
    pub fn recv(&mut self, timeout_ms: i32) -> Result<Option<Vec<u8>>, Error> {
        let remote_addr = self.connected_addr()?;
        loop {
            // 総経過時間は管理せず、poll_eventごとに同じ持ち時間を与える
            match self.modem.poll_event(timeout_ms)? {
                None => return Ok(None),
                Some(SkEvent::Erxudp(erxudp))
                    if erxudp.sender == remote_addr
                        && erxudp.sender_port == ECHONET_LITE_PORT
                        && erxudp.destination_port == ECHONET_LITE_PORT =>
                {
                    return Ok(Some(erxudp.data));
                }
                Some(SkEvent::Erxudp(erxudp)) => {
                    tracing::warn!(
                        "対象外のデータグラムを読み捨てた: {} ポート{}→{}",
                        erxudp.sender,
                        erxudp.sender_port,
                        erxudp.destination_port
                    );
                }
                Some(SkEvent::Event(event)) => {
                    tracing::debug!("受信待ち: {} {:?}", event.describe(), event)
                }
                Some(event) => tracing::debug!("受信待ちのイベントを読み飛ばす: {:?}", event),
            }
        }
    }

    /// セッションを閉じる。SKTERMの結果は気にしない。
    pub fn close(&mut self) {
        if self.state != State::Terminated {
            if let Err(e) = self.modem.skterm() {
                tracing::debug!("SKTERMの失敗を無視する: {}", e);
            }
        }
        self.state = State::Terminated;
        self.remote_addr = None;
    }

    fn connected_addr(&self) -> Result<Ipv6Addr, Error> {
        match (self.state, self.remote_addr) {
            (State::Connected, Some(addr)) => Ok(addr),
            _ => Err(Error::NotConnected),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lineport::LinePort;
    use crate::lineport::mock::MockPort;
    use std::str::FromStr;

    const EPANDESC_BLOCK: &str = "EPANDESC\r\n\
                                  \x20 Channel:21\r\n\
                                  \x20 Channel Page:09\r\n\
                                  \x20 Pan ID:8888\r\n\
                                  \x20 Addr:12345678ABCDEF01\r\n\
                                  \x20 LQI:E1\r\n\
                                  \x20 Side:0\r\n\
                                  \x20 PairID:AABBCCDD\r\n";
    const COORDINATOR: &str = "FE80:0000:0000:0000:021D:1290:1234:5678";

    fn credentials() -> Credentials {
        Credentials {
            id: Id::from_str("00112233445566778899AABBCCDDEEFF").unwrap(),
            password: Password::from_str("0123456789AB").unwrap(),
        }
    }

    fn session_with(script: &[u8]) -> Session<MockPort> {
        let mut port = MockPort::new();
        port.push_rx(script);
        Session::new(SkModem::new(LinePort::new(port)))
    }

    // 接続完了までの台本
    fn connect_script() -> Vec<u8> {
        [
            "OK\r\n", // SKRESET
            "OK\r\n", // SKSREG SFE 0
            "OK\r\n", // SKSETRBID
            "OK\r\n", // SKSETPWD
            "OK\r\n", // SKSCAN
            "EVENT 20 FE80:0000:0000:0000:0000:0000:0000:C890 0\r\n",
            EPANDESC_BLOCK,
            "EVENT 22 FE80:0000:0000:0000:0000:0000:0000:C890 0\r\n",
            "FE80:0000:0000:0000:021D:1290:1234:5678\r\n", // SKLL64
            "OK\r\n",                                      // SKSREG S02
            "OK\r\n",                                      // SKSREG S03
            "OK\r\n",                                      // SKJOIN
            "EVENT 25 FE80:0000:0000:0000:021D:1290:1234:5678 0\r\n",
        ]
        .concat()
        .into_bytes()
    }

    #[test]
    fn scan_success() {
        let mut session = session_with(&connect_script());
        session.connect(Some(&credentials()), 0xFFFFFFFF, 6).unwrap();

        assert_eq!(session.state(), State::Connected);
        assert_eq!(
            session.remote_addr(),
            Some(COORDINATOR.parse::<std::net::Ipv6Addr>().unwrap())
        );

        let expected = [
            "SKRESET\r\n",
            "SKSREG SFE 0\r\n",
            "SKSETRBID 00112233445566778899AABBCCDDEEFF\r\n",
            "SKSETPWD C 0123456789AB\r\n",
            "SKSCAN 2 FFFFFFFF 6 0\r\n",
            "SKLL64 12345678ABCDEF01\r\n",
            "SKSREG S02 21\r\n",
            "SKSREG S03 8888\r\n",
            "SKJOIN FE80:0000:0000:0000:021D:1290:1234:5678\r\n",
        ]
        .concat();
        assert_eq!(session.modem.port.get_ref().tx, expected.into_bytes());
    }

    #[test]
    fn scan_failure() {
        // beaconを受信しないままスキャンが終わった
        let script = [
            "OK\r\n", // SKRESET
            "OK\r\n", // SKSREG SFE 0
            "OK\r\n", // SKSCAN
            "EVENT 22 FE80:0000:0000:0000:0000:0000:0000:C890 0\r\n",
        ]
        .concat();
        let mut session = session_with(script.as_bytes());
        match session.connect(None, 0xFFFFFFFF, 6) {
            Err(Error::CoordinatorNotFound) => {}
            other => panic!("{:?}", other),
        }
        assert_eq!(session.state(), State::Disconnected);
    }

    #[test]
    fn join_failure() {
        let script = [
            "OK\r\n", // SKRESET
            "OK\r\n", // SKSREG SFE 0
            "OK\r\n", // SKSCAN
            "EVENT 20 FE80:0000:0000:0000:0000:0000:0000:C890 0\r\n",
            EPANDESC_BLOCK,
            "EVENT 22 FE80:0000:0000:0000:0000:0000:0000:C890 0\r\n",
            "FE80:0000:0000:0000:021D:1290:1234:5678\r\n", // SKLL64
            "OK\r\n",                                      // SKSREG S02
            "OK\r\n",                                      // SKSREG S03
            "OK\r\n",                                      // SKJOIN
            "EVENT 24 FE80:0000:0000:0000:021D:1290:1234:5678 0\r\n",
        ]
        .concat();
        let mut session = session_with(script.as_bytes());
        match session.connect(None, 0xFFFFFFFF, 6) {
            Err(Error::ConnectionFailed) => {}
            other => panic!("{:?}", other),
        }
    }

    #[test]
    fn recv_filters_peer_and_ports() {
        let erxudp = |sender: &str, rport: &str, lport: &str, data: &str| {
            format!(
                "ERXUDP {} FE80:0000:0000:0000:0000:0000:0000:0001 {} {} 021D129012345678 1 0 {:04X} {}\r\n",
                sender,
                rport,
                lport,
                data.len(),
                data
            )
        };
        let mut script = connect_script();
        // 別の相手からのデータグラム
        script.extend(
            erxudp(
                "FE80:0000:0000:0000:0000:0000:0000:BEEF",
                "0E1A",
                "0E1A",
                "no",
            )
            .into_bytes(),
        );
        // ポート番号違い
        script.extend(erxudp(COORDINATOR, "02CC", "0E1A", "no").into_bytes());
        script.extend(erxudp(COORDINATOR, "0E1A", "02CC", "no").into_bytes());
        // 本命
        script.extend(erxudp(COORDINATOR, "0E1A", "0E1A", "yes!").into_bytes());

        let mut session = session_with(&script);
        session.connect(Some(&credentials()), 0xFFFFFFFF, 6).unwrap();

        assert_eq!(session.recv(100).unwrap(), Some(b"yes!".to_vec()));
        // 台本が尽きたらタイムアウト
        assert_eq!(session.recv(100).unwrap(), None);
    }

    #[test]
    fn send_and_close() {
        let mut script = connect_script();
        script.extend(b"OK\r\n"); // SKSENDTO
        script.extend(b"OK\r\n"); // SKTERM

        let mut session = session_with(&script);
        session.connect(Some(&credentials()), 0xFFFFFFFF, 6).unwrap();

        session.send(&[0x10, 0x81]).unwrap();
        let tx = session.modem.port.get_ref().tx.clone();
        let needle =
            b"SKSENDTO 1 FE80:0000:0000:0000:021D:1290:1234:5678 0E1A 1 0 0002 \x10\x81\r\n";
        assert!(
            tx.windows(needle.len()).any(|w| w == needle.as_slice()),
            "SKSENDTO行が見つからない"
        );

        session.close();
        assert_eq!(session.state(), State::Terminated);
        match session.send(&[0x10, 0x81]) {
            Err(Error::NotConnected) => {}
            other => panic!("{:?}", other),
        }
        match session.recv(100) {
            Err(Error::NotConnected) => {}
            other => panic!("{:?}", other),
        }
    }

    #[test]
    fn connect_twice_is_rejected() {
        let mut session = session_with(&connect_script());
        session.connect(Some(&credentials()), 0xFFFFFFFF, 6).unwrap();
        match session.connect(None, 0xFFFFFFFF, 6) {
            Err(Error::AlreadyConnected) => {}
            other => panic!("{:?}", other),
        }
    }
}
