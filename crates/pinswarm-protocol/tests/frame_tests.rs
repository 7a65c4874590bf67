use pinswarm_protocol::*;

#[test]
fn test_identify_frame() {
    assert_eq!(
        Frame::parse("id|12D3KooWabc").unwrap(),
        Frame::Identify(PeerId::new("12D3KooWabc"))
    );
    assert!(Frame::parse("id|").is_err(), "empty peer id must be rejected");
}

#[test]
fn test_inventory_frame() {
    let frame = Frame::parse("cids|QmA,QmB,,QmC\n").unwrap();
    assert_eq!(
        frame,
        Frame::Inventory(vec![Cid::new("QmA"), Cid::new("QmB"), Cid::new("QmC")])
    );
    assert!(frame.is_probe_reply());

    assert_eq!(Frame::parse("cids|").unwrap(), Frame::Inventory(vec![]));
    assert_eq!(Frame::parse("cids|error").unwrap(), Frame::InventoryUnavailable);
    assert!(Frame::InventoryUnavailable.is_probe_reply());
}

#[test]
fn test_correlated_outcomes() {
    let ok = Frame::parse("ok|pin|QmA").unwrap();
    assert_eq!(ok.outcome_for(RequestKind::Pin, &Cid::new("QmA")), Some(true));
    assert_eq!(ok.outcome_for(RequestKind::Pin, &Cid::new("QmB")), None);
    assert_eq!(ok.outcome_for(RequestKind::Unpin, &Cid::new("QmA")), None);

    let err = Frame::parse("err|pin|QmA|fetch failed").unwrap();
    assert_eq!(err.outcome_for(RequestKind::Pin, &Cid::new("QmA")), Some(false));
    match err {
        Frame::Outcome { detail, .. } => assert_eq!(detail.as_deref(), Some("fetch failed")),
        other => panic!("unexpected frame {other:?}"),
    }

    let unpin = Frame::parse("ok|unpin|QmA").unwrap();
    assert_eq!(unpin.outcome_for(RequestKind::Unpin, &Cid::new("QmA")), Some(true));
}

#[test]
fn test_legacy_outcomes_match_any_request() {
    let success = Frame::parse("Success: pinned QmA recursively").unwrap();
    assert_eq!(success, Frame::LegacySuccess("pinned QmA recursively".into()));
    assert_eq!(success.outcome_for(RequestKind::Pin, &Cid::new("QmZ")), Some(true));

    let error = Frame::parse("Error: fetch failed").unwrap();
    assert_eq!(error.outcome_for(RequestKind::Unpin, &Cid::new("QmZ")), Some(false));
}

#[test]
fn test_outbound_frames_render() {
    assert_eq!(Frame::Ping.to_string(), "ping");
    assert_eq!(Frame::Pin(Cid::new("QmA")).to_string(), "pin|QmA");
    assert_eq!(Frame::Unpin(Cid::new("QmA")).to_string(), "unpin|QmA");
    assert_eq!(Frame::Heartbeat("n1".into()).to_string(), "hb|n1");
}

#[test]
fn test_unknown_and_empty_frames() {
    assert_eq!(Frame::parse("hello").unwrap(), Frame::Unknown("hello".into()));
    assert_eq!(Frame::parse("foo|bar").unwrap(), Frame::Unknown("foo|bar".into()));
    assert!(matches!(Frame::parse("  "), Err(ProtocolError::EmptyFrame)));
    assert_eq!(
        Frame::parse("hb|abc").unwrap(),
        Frame::Heartbeat("abc".into())
    );
}
