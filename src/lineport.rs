// シリアルポートの行指向ラッパー
// SPDX-License-Identifier: MPL-2.0
// SPDX-FileCopyrightText: 2025 Akihiro Yamamoto <github.com/ak1211>
//
use std::io;
use std::time::{Duration, Instant};

/// poll結果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Poll {
    ReadReady,    // 読み込み可能
    Timeout,      // 時間切れ
    Disconnected, // 切断された
}

/// 下位のバイトストリーム
pub trait RawPort {
    /// 1バイト以上読み込む。短い読み込みもある。
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;
    /// 全バイトを書き込む。
    fn write_all(&mut self, buf: &[u8]) -> io::Result<()>;
    /// timeout_msまで入力を待つ。-1は無期限。
    fn poll(&mut self, timeout_ms: i32) -> io::Result<Poll>;
}

impl RawPort for Box<dyn serialport::SerialPort> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        io::Read::read(self, buf)
    }

    fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        io::Write::write_all(self, buf)
    }

    fn poll(&mut self, timeout_ms: i32) -> io::Result<Poll> {
        let deadline = if timeout_ms < 0 {
            None
        } else {
            Some(Instant::now() + Duration::from_millis(timeout_ms as u64))
        };
        loop {
            match self.bytes_to_read() {
                Ok(0) => {}
                Ok(_) => return Ok(Poll::ReadReady),
                Err(e) if e.kind() == serialport::ErrorKind::NoDevice => {
                    return Ok(Poll::Disconnected);
                }
                Err(e) => return Err(io::Error::from(e)),
            }
            if let Some(deadline) = deadline {
                if Instant::now() >= deadline {
                    return Ok(Poll::Timeout);
                }
            }
            std::thread::sleep(Duration::from_millis(10));
        }
    }
}

/// 押し戻しバッファ付きポート
pub struct LinePort<P> {
    pub port: P,
    pushback: Vec<u8>,
}

impl<P: RawPort> LinePort<P> {
    pub fn new(port: P) -> Self {
        Self {
            port,
            pushback: Vec::new(),
        }
    }

    pub fn get_ref(&self) -> &P {
        &self.port
    }

    pub fn get_mut(&mut self) -> &mut P {
        &mut self.port
    }

    /// 読み込む。押し戻しバッファを先に消費する。
    pub fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if !self.pushback.is_empty() {
            let n = buf.len().min(self.pushback.len());
            buf[..n].copy_from_slice(&self.pushback[..n]);
            self.pushback.drain(..n);
            return Ok(n);
        }
        self.port.read(buf)
    }

    pub fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        self.port.write_all(buf)
    }

    /// 次のreadで返すように押し戻す。呼び出し単位でLIFO、バイト順は保存。
    pub fn unread(&mut self, bytes: &[u8]) {
        self.pushback.splice(..0, bytes.iter().copied());
    }

    /// 入力を待つ。押し戻しバッファがあれば即座に読み込み可能。
    pub fn poll(&mut self, timeout_ms: i32) -> io::Result<Poll> {
        if !self.pushback.is_empty() {
            return Ok(Poll::ReadReady);
        }
        self.port.poll(timeout_ms)
    }
}

#[cfg(test)]
pub(crate) mod mock {
    use super::{Poll, RawPort};
    use std::collections::VecDeque;
    use std::io;

    /// 台本通りに応答する試験用ポート
    pub(crate) struct MockPort {
        pub tx: Vec<u8>,
        pub rx: VecDeque<u8>,
    }

    impl MockPort {
        pub(crate) fn new() -> Self {
            Self {
                tx: Vec::new(),
                rx: VecDeque::new(),
            }
        }

        pub(crate) fn push_rx(&mut self, bytes: &[u8]) {
            self.rx.extend(bytes);
        }
    }

    impl RawPort for MockPort {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            // 台本が尽きたらハングアップ扱い
            if self.rx.is_empty() {
                return Ok(0);
            }
            let n = buf.len().min(self.rx.len());
            for slot in buf[..n].iter_mut() {
                *slot = self.rx.pop_front().unwrap();
            }
            Ok(n)
        }

        fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
            self.tx.extend_from_slice(buf);
            Ok(())
        }

        fn poll(&mut self, _timeout_ms: i32) -> io::Result<Poll> {
            if self.rx.is_empty() {
                Ok(Poll::Timeout)
            } else {
                Ok(Poll::ReadReady)
            }
        }
    }
}

#[test]
fn test1() {
    let mut port = LinePort::new(mock::MockPort::new());
    port.get_mut().push_rx(b"CD");
    port.unread(b"AB");

    let mut buf = [0u8; 1];
    assert_eq!(port.read(&mut buf).unwrap(), 1);
    assert_eq!(&buf, b"A");
    assert_eq!(port.read(&mut buf).unwrap(), 1);
    assert_eq!(&buf, b"B");

    let mut buf = [0u8; 4];
    assert_eq!(port.read(&mut buf).unwrap(), 2);
    assert_eq!(&buf[..2], b"CD");
}

#[test]
fn test2() {
    // unreadの呼び出しはLIFO、呼び出し内のバイト順は保存される
    let mut port = LinePort::new(mock::MockPort::new());
    port.unread(b"CD");
    port.unread(b"AB");

    let mut buf = [0u8; 4];
    assert_eq!(port.read(&mut buf).unwrap(), 4);
    assert_eq!(&buf, b"ABCD");
}

#[test]
fn test3() {
    let mut port = LinePort::new(mock::MockPort::new());
    assert_eq!(port.poll(0).unwrap(), Poll::Timeout);
    port.unread(b"X");
    assert_eq!(port.poll(0).unwrap(), Poll::ReadReady);

    port.write_all(b"SKRESET\r\n").unwrap();
    assert_eq!(port.get_ref().tx, b"SKRESET\r\n");
}
