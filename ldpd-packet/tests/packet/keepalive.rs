use std::sync::LazyLock as Lazy;

use ldpd_packet::*;

use super::{decode_cxt, test_decode_msg, test_encode_msg};

static KEEPALIVE_MSG: Lazy<(Vec<u8>, Message)> = Lazy::new(|| {
    (
        vec![0x02, 0x01, 0x00, 0x04, 0x00, 0x00, 0x00, 0x03],
        KeepaliveMsg { msg_id: 3 }.into(),
    )
});

#[test]
fn test_encode_keepalive() {
    let (ref bytes, ref msg) = *KEEPALIVE_MSG;
    test_encode_msg(bytes, msg);
}

#[test]
fn test_decode_keepalive() {
    let (ref bytes, ref msg) = *KEEPALIVE_MSG;
    test_decode_msg(&decode_cxt(None), bytes, msg);
}
