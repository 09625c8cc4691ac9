// メトリクス収集
// SPDX-License-Identifier: MPL-2.0
// SPDX-FileCopyrightText: 2025 Akihiro Yamamoto <github.com/ak1211>
//
use crate::echonetlite::{Edata, EchonetliteFrame, Eoj, FrameError, Property};
use crate::lineport::RawPort;
use crate::settings::{FieldLayout, Measure};
use crate::skstack::session::{self, Session};
use std::sync::atomic::{AtomicU16, Ordering};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ScrapeError {
    #[error(transparent)]
    Session(#[from] session::Error),
    #[error(transparent)]
    Frame(#[from] FrameError),
    #[error("応答待ちがタイムアウトした")]
    Timeout,
}

/// プロセス全体で単調増加するトランザクションIDの払い出し
pub struct TransactionAllocator(AtomicU16);

impl TransactionAllocator {
    pub fn new(initial: u16) -> Self {
        Self(AtomicU16::new(initial))
    }

    /// 1つ払い出す。0xFFFFの次は0へ巻き戻る。
    pub fn take(&self) -> u16 {
        self.0.fetch_add(1, Ordering::AcqRel)
    }
}

/// EDT先頭から宣言順に固定幅整数を読み出す
pub fn read_fields(property: &Property, layouts: &[FieldLayout]) -> Vec<(String, i64)> {
    let Some(edt) = property.edt.as_ref() else {
        return Vec::new();
    };
    let mut values = Vec::new();
    let mut offset = 0usize;
    for layout in layouts {
        let width = layout.kind.width();
        let Some(bytes) = edt.get(offset..offset + width) else {
            tracing::warn!(
                "EDTがレイアウトの宣言より短い: EPC=0x{:02X} {}バイト",
                property.epc,
                edt.len()
            );
            break;
        };
        values.push((layout.name.clone(), layout.kind.read(bytes)));
        offset += width;
    }
    values
}

/// スクレイプ1回分の取得を面倒見る
pub struct Exporter<P> {
    pub session: Session<P>,
    tids: TransactionAllocator,
    target_object: Eoj,
    measures: Vec<Measure>,
    recv_timeout_ms: i32,
}

impl<P: RawPort> Exporter<P> {
    pub fn new(
        session: Session<P>,
        target_object: Eoj,
        measures: Vec<Measure>,
        recv_timeout_ms: i32,
    ) -> Self {
        Self {
            session,
            tids: TransactionAllocator::new(1),
            target_object,
            measures,
            recv_timeout_ms,
        }
    }

    /// 要求を送って同じTIDの応答を待つ。Noneはタイムアウト。
    pub fn request(
        &mut self,
        frame: &EchonetliteFrame,
        timeout_ms: i32,
    ) -> Result<Option<EchonetliteFrame>, ScrapeError> {
        let bytes = frame.encode();
        self.session.send(&bytes)?;
        loop {
            let Some(data) = self.session.recv(timeout_ms)? else {
                return Ok(None);
            };
            let resp = EchonetliteFrame::decode(&data)?;
            if resp.tid() == frame.tid() {
                return Ok(Some(resp));
            }
            tracing::debug!(
                "TID不一致の応答を読み捨てた: 期待0x{:04X} 受信0x{:04X}",
                frame.tid(),
                resp.tid()
            );
        }
    }

    /// 設定された全計測値を1フレームのGet要求で取得する
    pub fn scrape(&mut self) -> Result<Vec<(String, i64)>, ScrapeError> {
        let frame = EchonetliteFrame::Format1 {
            tid: self.tids.take(),
            edata: Edata {
                seoj: Eoj {
                    class_group: 0x05,
                    class_code: 0xff,
                    instance: 0x01,
                }, // home controller
                deoj: self.target_object,
                esv: 0x62, // get要求
                props: self
                    .measures
                    .iter()
                    .map(|measure| Property {
                        epc: measure.epc,
                        ..Default::default()
                    })
                    .collect(),
            },
        };

        let resp = self
            .request(&frame, self.recv_timeout_ms)?
            .ok_or(ScrapeError::Timeout)?;
        tracing::debug!("{}", resp);

        let EchonetliteFrame::Format1 { edata, .. } = resp else {
            // 形式2の応答に計測値はない
            return Ok(Vec::new());
        };

        let mut values = Vec::new();
        for measure in self.measures.iter() {
            match edata.props.iter().find(|prop| prop.epc == measure.epc) {
                Some(prop) => values.extend(read_fields(prop, &measure.layouts())),
                None => tracing::warn!("応答にEPC=0x{:02X}が含まれない", measure.epc),
            }
        }
        Ok(values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lineport::LinePort;
    use crate::lineport::mock::MockPort;
    use crate::settings::FieldKind;
    use crate::skstack::driver::SkModem;

    const COORDINATOR: &str = "FE80:0000:0000:0000:021D:1290:1234:5678";

    // 接続完了までの台本
    fn connect_script() -> Vec<u8> {
        [
            "OK\r\n", // SKRESET
            "OK\r\n", // SKSREG SFE 0
            "OK\r\n", // SKSCAN
            "EVENT 20 FE80:0000:0000:0000:0000:0000:0000:C890 0\r\n",
            "EPANDESC\r\n",
            "  Channel:21\r\n",
            "  Channel Page:09\r\n",
            "  Pan ID:8888\r\n",
            "  Addr:12345678ABCDEF01\r\n",
            "  LQI:E1\r\n",
            "  Side:0\r\n",
            "  PairID:AABBCCDD\r\n",
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

    fn erxudp_from_meter(payload: &[u8]) -> Vec<u8> {
        let header = format!(
            "ERXUDP {} FE80:0000:0000:0000:0000:0000:0000:0001 0E1A 0E1A 021D129012345678 1 0 {:04X} ",
            COORDINATOR,
            payload.len()
        );
        [header.as_bytes(), payload, b"\r\n"].concat()
    }

    fn measures() -> Vec<Measure> {
        vec![Measure {
            name: "smartmeter_instant_power_watts".to_owned(),
            help: Some("instantious electric power".to_owned()),
            epc: 0xe7,
            layout: Vec::new(),
        }]
    }

    fn exporter_with(script: &[u8]) -> Exporter<MockPort> {
        let mut port = MockPort::new();
        port.push_rx(script);
        let session = Session::new(SkModem::new(LinePort::new(port)));
        let mut exporter = Exporter::new(
            session,
            Eoj {
                class_group: 0x02,
                class_code: 0x88,
                instance: 0x01,
            },
            measures(),
            5000,
        );
        exporter.session.connect(None, 0xFFFFFFFF, 6).unwrap();
        exporter
    }

    #[test]
    fn correlated_get_response() {
        // Get要求(TID=1)に対するGet_Res応答(瞬時電力300W)
        let mut script = connect_script();
        script.extend(b"OK\r\n"); // SKSENDTO
        script.extend(erxudp_from_meter(&[
            0x10, 0x81, //
            0x00, 0x01, // tid
            0x02, 0x88, 0x01, //
            0x05, 0xff, 0x01, //
            0x63, //
            0x01, //
            0xe7, 0x04, 0x00, 0x00, 0x01, 0x2c, //
        ]));

        let mut exporter = exporter_with(&script);
        let values = exporter.scrape().unwrap();
        assert_eq!(
            values,
            vec![("smartmeter_instant_power_watts".to_owned(), 300)]
        );
    }

    #[test]
    fn mismatched_tid_is_discarded() {
        // TIDが合わない応答は読み捨てて、次の一致する応答を返す
        let mut script = connect_script();
        script.extend(b"OK\r\n"); // SKSENDTO
        script.extend(erxudp_from_meter(&[
            0x10, 0x81, 0x00, 0x00, // tid = 要求 - 1
            0x02, 0x88, 0x01, 0x05, 0xff, 0x01, 0x63, 0x01, 0xe7, 0x04, 0xff, 0xff, 0xff, 0xff,
        ]));
        script.extend(erxudp_from_meter(&[
            0x10, 0x81, 0x00, 0x01, // tid = 要求
            0x02, 0x88, 0x01, 0x05, 0xff, 0x01, 0x63, 0x01, 0xe7, 0x04, 0x00, 0x00, 0x01, 0x2c,
        ]));

        let mut exporter = exporter_with(&script);
        let values = exporter.scrape().unwrap();
        assert_eq!(
            values,
            vec![("smartmeter_instant_power_watts".to_owned(), 300)]
        );
    }

    #[test]
    fn scrape_timeout() {
        // 応答が来なければタイムアウト
        let mut script = connect_script();
        script.extend(b"OK\r\n"); // SKSENDTO
        let mut exporter = exporter_with(&script);
        match exporter.scrape() {
            Err(ScrapeError::Timeout) => {}
            other => panic!("{:?}", other),
        }
    }

    #[test]
    fn transaction_ids_increase_and_wrap() {
        let tids = TransactionAllocator::new(1);
        assert_eq!(tids.take(), 1);
        assert_eq!(tids.take(), 2);

        let tids = TransactionAllocator::new(0xffff);
        assert_eq!(tids.take(), 0xffff);
        assert_eq!(tids.take(), 0);
    }

    #[test]
    fn field_extraction() {
        let layouts = vec![
            FieldLayout {
                name: "r".to_owned(),
                kind: FieldKind::I16,
            },
            FieldLayout {
                name: "t".to_owned(),
                kind: FieldKind::I16,
            },
        ];

        // 単相3線式の瞬時電流 R=5.2A, T=1.0A
        let prop = Property {
            epc: 0xe8,
            edt: Some(vec![0x00, 0x34, 0x00, 0x0a]),
        };
        assert_eq!(
            read_fields(&prop, &layouts),
            vec![("r".to_owned(), 52), ("t".to_owned(), 10)]
        );

        // EDTなしは空
        let empty = Property {
            epc: 0xe8,
            edt: None,
        };
        assert_eq!(read_fields(&empty, &layouts), Vec::new());

        // 短いEDTは読める分だけ
        let short = Property {
            epc: 0xe8,
            edt: Some(vec![0x00, 0x34]),
        };
        assert_eq!(read_fields(&short, &layouts), vec![("r".to_owned(), 52)]);
    }
}
