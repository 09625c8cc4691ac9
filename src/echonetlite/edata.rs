// Echonetlite EDATA
// SPDX-License-Identifier: MPL-2.0
// SPDX-FileCopyrightText: 2025 Akihiro Yamamoto <github.com/ak1211>
//
use bincode::de::read::Reader;
use core::result;
use serde::{Deserialize, Serialize};

/// Echonetオブジェクト識別子
#[derive(Serialize, Deserialize, Clone, Copy, Eq, PartialEq, Debug)]
pub struct Eoj {
    pub class_group: u8,
    pub class_code: u8,
    pub instance: u8,
}

impl<Context> bincode::Decode<Context> for Eoj {
    fn decode<D: bincode::de::Decoder<Context = Context>>(
        decoder: &mut D,
    ) -> result::Result<Self, bincode::error::DecodeError> {
        let class_group: u8 = bincode::Decode::decode(decoder)?;
        let class_code: u8 = bincode::Decode::decode(decoder)?;
        let instance: u8 = bincode::Decode::decode(decoder)?;
        Ok(Self {
            class_group,
            class_code,
            instance,
        })
    }
}

impl bincode::Encode for Eoj {
    fn encode<E: bincode::enc::Encoder>(
        &self,
        encoder: &mut E,
    ) -> result::Result<(), bincode::error::EncodeError> {
        bincode::Encode::encode(&self.class_group, encoder)?;
        bincode::Encode::encode(&self.class_code, encoder)?;
        bincode::Encode::encode(&self.instance, encoder)?;
        Ok(())
    }
}

/// プロパティ。edtがNoneならPDC=0。
#[derive(Clone, Eq, PartialEq, Debug, Default)]
pub struct Property {
    pub epc: u8,
    pub edt: Option<Vec<u8>>,
}

impl<Context> bincode::Decode<Context> for Property {
    fn decode<D: bincode::de::Decoder<Context = Context>>(
        decoder: &mut D,
    ) -> result::Result<Self, bincode::error::DecodeError> {
        let epc: u8 = bincode::Decode::decode(decoder)?;
        let pdc: u8 = bincode::Decode::decode(decoder)?;
        let edt = if pdc == 0 {
            None
        } else {
            // EDTはUARTの読み込みバッファとは独立に所有する
            let mut buf = vec![0u8; pdc as usize];
            decoder.claim_bytes_read(pdc as usize)?;
            decoder.reader().read(&mut buf)?;
            Some(buf)
        };
        Ok(Self { epc, edt })
    }
}

impl bincode::Encode for Property {
    fn encode<E: bincode::enc::Encoder>(
        &self,
        encoder: &mut E,
    ) -> result::Result<(), bincode::error::EncodeError> {
        let edt = self.edt.as_deref().unwrap_or(&[]);
        assert!(edt.len() <= 0xff, "EDTは255バイトまで");
        bincode::Encode::encode(&self.epc, encoder)?;
        bincode::Encode::encode(&(edt.len() as u8), encoder)?;
        for v in edt {
            bincode::Encode::encode(v, encoder)?;
        }
        Ok(())
    }
}

/// 形式1のEDATA
#[derive(Clone, Eq, PartialEq, Debug)]
pub struct Edata {
    pub seoj: Eoj,
    pub deoj: Eoj,
    pub esv: u8,
    pub props: Vec<Property>,
}

impl<Context> bincode::Decode<Context> for Edata {
    fn decode<D: bincode::de::Decoder<Context = Context>>(
        decoder: &mut D,
    ) -> result::Result<Self, bincode::error::DecodeError> {
        let seoj: Eoj = bincode::Decode::decode(decoder)?;
        let deoj: Eoj = bincode::Decode::decode(decoder)?;
        let esv: u8 = bincode::Decode::decode(decoder)?;
        let opc: u8 = bincode::Decode::decode(decoder)?;
        let mut props: Vec<Property> = Vec::with_capacity(opc as usize);
        for _idx in 0..opc {
            props.push(bincode::Decode::decode(decoder)?);
        }
        Ok(Self {
            seoj,
            deoj,
            esv,
            props,
        })
    }
}

impl bincode::Encode for Edata {
    fn encode<E: bincode::enc::Encoder>(
        &self,
        encoder: &mut E,
    ) -> result::Result<(), bincode::error::EncodeError> {
        assert!(self.props.len() <= 0xff, "OPCは255まで");
        bincode::Encode::encode(&self.seoj, encoder)?;
        bincode::Encode::encode(&self.deoj, encoder)?;
        bincode::Encode::encode(&self.esv, encoder)?;
        bincode::Encode::encode(&(self.props.len() as u8), encoder)?;
        for v in &self.props {
            bincode::Encode::encode(v, encoder)?;
        }
        Ok(())
    }
}

#[test]
fn test1() {
    let e7 = Property {
        epc: 0xe7,
        edt: Some(vec![1, 2, 3, 4]),
    };

    let binary: Vec<u8> = vec![0xe7, 0x04, 0x01, 0x02, 0x03, 0x04];
    let config = bincode::config::standard()
        .with_big_endian()
        .with_fixed_int_encoding();
    let encoded = bincode::encode_to_vec(&e7, config).unwrap();
    assert_eq!(encoded, binary);

    let (decoded, _len): (Property, usize) =
        bincode::decode_from_slice(&encoded[..], config).unwrap();
    assert_eq!(e7, decoded);
}

#[test]
fn test2() {
    // EDTなしはPDC=0
    let empty = Property {
        epc: 0xe8,
        ..Default::default()
    };
    let config = bincode::config::standard()
        .with_big_endian()
        .with_fixed_int_encoding();
    let encoded = bincode::encode_to_vec(&empty, config).unwrap();
    assert_eq!(encoded, vec![0xe8, 0x00]);

    let (decoded, _len): (Property, usize) =
        bincode::decode_from_slice(&encoded[..], config).unwrap();
    assert_eq!(decoded.edt, None);
}
