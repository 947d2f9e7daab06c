//! Command transmission over a transport, in the clear or through the tunnel
//!
//! Both paths split long data fields into command chains and collect data the
//! card announces with `61xx`. Under secure messaging the `GET RESPONSE` itself
//! is sent unprotected and its bytes are spliced into the protected frame
//! before verification.

use bytes::{Bytes, BytesMut};
use eidcard_apdu_core::response::status::common::SM_DATA_INCORRECT;
use eidcard_apdu_core::{CardTransport, Command, MAX_SHORT_DATA, Response, StatusWord};
use tracing::{trace, warn};

use crate::commands::read::get_response;
use crate::error::{Error, IntegrityFailure, Result};
use crate::secure_messaging::{MAX_PROTECTED_DATA, SecureMessaging};

/// Expected SM data objects missing (69 87)
const SM_OBJECTS_MISSING: StatusWord = StatusWord::new(0x69, 0x87);

/// Most data collected through `61xx` before the card is considered faulty
pub(crate) const MAX_RESPONSE_LENGTH: usize = 64 * 1024;

/// Something commands can be sent over
pub(crate) trait Link {
    /// Send a command and return the card's answer, whatever its status
    fn transmit(&mut self, command: &Command) -> Result<Response>;

    /// Send a command and return its data, failing on any status but `90 00`
    fn send(&mut self, command: &Command) -> Result<Bytes> {
        Ok(self.transmit(command)?.into_result()?)
    }
}

/// Unprotected link, used before the tunnel exists
#[derive(Debug)]
pub(crate) struct PlainLink<'a, T: ?Sized> {
    transport: &'a mut T,
}

impl<'a, T: CardTransport + ?Sized> PlainLink<'a, T> {
    pub(crate) const fn new(transport: &'a mut T) -> Self {
        Self { transport }
    }
}

impl<T: CardTransport + ?Sized> Link for PlainLink<'_, T> {
    fn transmit(&mut self, command: &Command) -> Result<Response> {
        transmit_plain(self.transport, command)
    }
}

/// Link through an established secure messaging tunnel
#[derive(Debug)]
pub(crate) struct SecureLink<'a, T: ?Sized> {
    transport: &'a mut T,
    sm: &'a mut SecureMessaging,
}

impl<'a, T: CardTransport + ?Sized> SecureLink<'a, T> {
    pub(crate) const fn new(transport: &'a mut T, sm: &'a mut SecureMessaging) -> Self {
        Self { transport, sm }
    }
}

impl<T: CardTransport + ?Sized> Link for SecureLink<'_, T> {
    fn transmit(&mut self, command: &Command) -> Result<Response> {
        transmit_protected(self.transport, self.sm, command)
    }
}

/// Send a command in the clear
pub(crate) fn transmit_plain<T: CardTransport + ?Sized>(
    transport: &mut T,
    command: &Command,
) -> Result<Response> {
    let links = command.chain(MAX_SHORT_DATA);
    let Some((last, init)) = links.split_last() else {
        return Err(Error::InvalidInput("empty command chain"));
    };

    for link in init {
        let response = transport.transceive(link)?;
        if !response.is_success() {
            return Ok(response);
        }
    }

    let mut response = transport.transceive(last)?;
    let mut data = BytesMut::from(response.data());
    while let Some(remaining) = response.status().remaining_bytes() {
        trace!(remaining, "Fetching remaining response data");
        response = transport.transceive(&get_response(remaining))?;
        data.extend_from_slice(response.data());
        if data.len() > MAX_RESPONSE_LENGTH {
            warn!(len = data.len(), "Card keeps announcing more response data");
            return Err(Error::InvalidData("response longer than 64 KiB"));
        }
    }

    Ok(Response::new(Some(data.freeze()), response.status()))
}

/// Send a command through the tunnel; each link of a chain is protected on its own
pub(crate) fn transmit_protected<T: CardTransport + ?Sized>(
    transport: &mut T,
    sm: &mut SecureMessaging,
    command: &Command,
) -> Result<Response> {
    let links = command.chain(MAX_PROTECTED_DATA);
    let Some((last, init)) = links.split_last() else {
        return Err(Error::InvalidInput("empty command chain"));
    };

    for link in init {
        let response = exchange_protected(transport, sm, link)?;
        if !response.is_success() {
            return Ok(response);
        }
    }

    exchange_protected(transport, sm, last)
}

fn exchange_protected<T: CardTransport + ?Sized>(
    transport: &mut T,
    sm: &mut SecureMessaging,
    command: &Command,
) -> Result<Response> {
    let protected = sm.protect(command)?;
    let mut raw = BytesMut::from(&transport.transmit_raw(&protected.to_bytes())?[..]);

    // GET RESPONSE travels in the clear; its data continues the protected frame
    while let Some(remaining) = trailing_status(&raw)?.remaining_bytes() {
        trace!(remaining, "Fetching remaining protected response");
        raw.truncate(raw.len() - 2);
        let more = transport.transmit_raw(&get_response(remaining).to_bytes())?;
        raw.extend_from_slice(&more);
        if raw.len() > MAX_RESPONSE_LENGTH {
            warn!(len = raw.len(), "Card keeps announcing more protected data");
            return Err(IntegrityFailure::Malformed("protected response longer than 64 KiB").into());
        }
    }

    let status = trailing_status(&raw)?;
    if raw.len() == 2 && !status.is_success() {
        // Nothing to verify, but the card has counted the response
        sm.skip_response();
        if status == SM_DATA_INCORRECT || status == SM_OBJECTS_MISSING {
            warn!(%status, "Card rejected secure messaging frame");
            return Err(IntegrityFailure::Rejected(status).into());
        }
        return Ok(Response::error(status));
    }

    sm.unprotect(&raw)
}

fn trailing_status(raw: &[u8]) -> Result<StatusWord> {
    match raw {
        [.., sw1, sw2] => Ok(StatusWord::new(*sw1, *sw2)),
        _ => Err(IntegrityFailure::Malformed("response shorter than a status word").into()),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;

    use eidcard_apdu_core::TransportError;

    use super::*;
    use crate::crypto::{KDF_ENC, KDF_MAC, kdf};

    /// Transport answering from a script and recording what it was sent
    #[derive(Debug, Default)]
    struct ScriptedTransport {
        answers: VecDeque<Bytes>,
        sent: Vec<Vec<u8>>,
    }

    impl ScriptedTransport {
        fn new(answers: impl IntoIterator<Item = Bytes>) -> Self {
            Self {
                answers: answers.into_iter().collect(),
                sent: Vec::new(),
            }
        }
    }

    impl CardTransport for ScriptedTransport {
        fn do_transmit_raw(&mut self, command: &[u8]) -> std::result::Result<Bytes, TransportError> {
            self.sent.push(command.to_vec());
            self.answers.pop_front().ok_or(TransportError::TagLost)
        }

        fn is_connected(&self) -> bool {
            !self.answers.is_empty()
        }

        fn reset(&mut self) -> std::result::Result<(), TransportError> {
            Ok(())
        }
    }

    /// Card that announces another full chunk after every chunk
    #[derive(Debug, Default)]
    struct EndlessTransport {
        exchanges: usize,
    }

    impl CardTransport for EndlessTransport {
        fn do_transmit_raw(&mut self, _: &[u8]) -> std::result::Result<Bytes, TransportError> {
            self.exchanges += 1;
            let mut chunk = vec![0xAB; 0xFF];
            chunk.extend_from_slice(&[0x61, 0xFF]);
            Ok(Bytes::from(chunk))
        }

        fn is_connected(&self) -> bool {
            true
        }

        fn reset(&mut self) -> std::result::Result<(), TransportError> {
            Ok(())
        }
    }

    fn channel_pair() -> (SecureMessaging, SecureMessaging) {
        let enc = kdf(b"tunnel", KDF_ENC);
        let mac = kdf(b"tunnel", KDF_MAC);
        (
            SecureMessaging::new(enc.clone(), mac.clone()),
            SecureMessaging::new(enc, mac),
        )
    }

    #[test]
    fn test_plain_get_response() {
        let mut transport = ScriptedTransport::new([
            Bytes::from_static(&[0x01, 0x02, 0x61, 0x02]),
            Bytes::from_static(&[0x03, 0x04, 0x90, 0x00]),
        ]);
        let response =
            transmit_plain(&mut transport, &Command::new_with_le(0x00, 0xB0, 0, 0, 0)).unwrap();

        assert!(response.is_success());
        assert_eq!(response.data(), &[0x01, 0x02, 0x03, 0x04]);
        assert_eq!(transport.sent[1], vec![0x00, 0xC0, 0x00, 0x00, 0x02]);
    }

    #[test]
    fn test_plain_get_response_is_bounded() {
        let mut transport = EndlessTransport::default();
        let result = transmit_plain(&mut transport, &Command::new_with_le(0x00, 0xB0, 0, 0, 0));

        assert!(matches!(result, Err(Error::InvalidData(_))));
        assert_eq!(transport.exchanges, MAX_RESPONSE_LENGTH / 0xFF + 1);
    }

    #[test]
    fn test_plain_chaining() {
        let mut transport = ScriptedTransport::new([
            Bytes::from_static(&[0x90, 0x00]),
            Bytes::from_static(&[0x90, 0x00]),
        ]);
        let command = Command::new_with_data(0x00, 0x2A, 0x9E, 0x9A, vec![0x55; 300]);
        transmit_plain(&mut transport, &command).unwrap();

        assert_eq!(transport.sent.len(), 2);
        assert_eq!(&transport.sent[0][..5], &[0x10, 0x2A, 0x9E, 0x9A, 0xFF]);
        assert_eq!(&transport.sent[1][..5], &[0x00, 0x2A, 0x9E, 0x9A, 45]);
    }

    #[test]
    fn test_plain_chain_stops_on_error() {
        let mut transport = ScriptedTransport::new([Bytes::from_static(&[0x6A, 0x80])]);
        let command = Command::new_with_data(0x00, 0x2A, 0x9E, 0x9A, vec![0x55; 300]);
        let response = transmit_plain(&mut transport, &command).unwrap();
        assert_eq!(response.status(), StatusWord::new(0x6A, 0x80));
        assert_eq!(transport.sent.len(), 1);
    }

    #[test]
    fn test_protected_get_response_is_spliced() {
        let (mut host, mut chip) = channel_pair();

        // Card side prepared ahead of time: same counter discipline as the host
        let mut chip_counter = host.clone();
        chip_counter
            .protect(&Command::new_with_le(0x00, 0xB0, 0, 0, 0))
            .unwrap();
        chip.set_ssc(*chip_counter.ssc());
        let full = chip
            .protect_response(&Response::success(Some(Bytes::from(vec![0x5A; 40]))))
            .unwrap();

        // First frame carries 20 bytes and announces the rest
        let split = 20;
        let mut first = full[..split].to_vec();
        first.extend_from_slice(&[0x61, (full.len() - 2 - split) as u8]);
        let rest = full[split..].to_vec();

        let mut transport = ScriptedTransport::new([Bytes::from(first), Bytes::from(rest)]);
        let response = transmit_protected(
            &mut transport,
            &mut host,
            &Command::new_with_le(0x00, 0xB0, 0, 0, 0),
        )
        .unwrap();

        assert_eq!(response.data(), &[0x5A; 40]);
        assert_eq!(transport.sent[1][..4], [0x00, 0xC0, 0x00, 0x00]);
        assert_eq!(host.ssc(), chip.ssc());
    }

    #[test]
    fn test_protected_get_response_is_bounded() {
        let (mut host, _) = channel_pair();
        let mut transport = EndlessTransport::default();
        let result = transmit_protected(
            &mut transport,
            &mut host,
            &Command::new_with_le(0x00, 0xB0, 0, 0, 0),
        );

        assert!(matches!(
            result,
            Err(Error::ChannelIntegrity(IntegrityFailure::Malformed(_)))
        ));
        // The status word of the last chunk still counts towards the limit
        assert_eq!(transport.exchanges, MAX_RESPONSE_LENGTH / 0xFF);
    }

    #[test]
    fn test_protected_bare_error_advances_counter() {
        let (mut host, _) = channel_pair();
        let mut transport = ScriptedTransport::new([Bytes::from_static(&[0x6A, 0x82])]);
        let response =
            transmit_protected(&mut transport, &mut host, &Command::new(0x00, 0xA4, 0x02, 0x0C))
                .unwrap();

        assert_eq!(response.status(), StatusWord::new(0x6A, 0x82));
        assert_eq!(host.ssc()[15], 2);
    }

    #[test]
    fn test_protected_rejection_is_integrity_failure() {
        let (mut host, _) = channel_pair();
        let mut transport = ScriptedTransport::new([Bytes::from_static(&[0x69, 0x88])]);
        let result =
            transmit_protected(&mut transport, &mut host, &Command::new(0x00, 0xB0, 0, 0));
        assert!(matches!(
            result,
            Err(Error::ChannelIntegrity(IntegrityFailure::Rejected(_)))
        ));
    }

    #[test]
    fn test_link_send_maps_status() {
        let mut transport = ScriptedTransport::new([Bytes::from_static(&[0x6A, 0x82])]);
        let mut link = PlainLink::new(&mut transport);
        assert!(matches!(
            link.send(&Command::new(0x00, 0xA4, 0, 0)),
            Err(Error::ApduResponse { status }) if status == StatusWord::new(0x6A, 0x82)
        ));
    }

    #[test]
    fn test_tag_loss_propagates() {
        let mut transport = ScriptedTransport::default();
        assert!(matches!(
            transmit_plain(&mut transport, &Command::new(0x00, 0xA4, 0, 0)),
            Err(Error::TagLost)
        ));
    }
}
