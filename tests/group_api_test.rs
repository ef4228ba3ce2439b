use wachat::binary::builder::NodeBuilder;
use wachat::groups::GroupListKind;
use wachat::test_utils::{drain_post_login, logged_in_harness};
use wachat::types::events::{Event, ParticipantChange};

#[tokio::test]
async fn test_list_groups_round_trip() {
    let (mut harness, mut server, _read_task) = logged_in_harness().await;
    drain_post_login(&mut harness, &mut server).await;

    let client = harness.client.clone();
    let request =
        tokio::spawn(async move { client.list_groups(GroupListKind::Participating).await });

    let iq = server.next_node(&mut harness).await;
    assert_eq!(iq.tag, "iq");
    let mut attrs = iq.attrs();
    assert_eq!(attrs.optional_string("xmlns"), Some("w:g2"));
    assert_eq!(attrs.optional_string("to"), Some("g.us"));
    assert!(iq.get_optional_child("participating").is_some());
    let id = attrs.optional_string("id").unwrap().to_string();

    let reply = NodeBuilder::new("iq")
        .attr("from", "g.us")
        .attr("id", id)
        .attr("type", "result")
        .children([NodeBuilder::new("groups").children([
            NodeBuilder::new("group")
                .attr("id", "31000000000-1441234567")
                .attr("owner", "31000000000@s.whatsapp.net")
                .attr("subject", "Weekend plans")
                .attr("creation", "1441234567")
                .children([
                    NodeBuilder::new("participant")
                        .attr("jid", "31000000000@s.whatsapp.net")
                        .attr("type", "admin")
                        .build(),
                    NodeBuilder::new("participant")
                        .attr("jid", "49123@s.whatsapp.net")
                        .build(),
                ])
                .build(),
            NodeBuilder::new("group")
                .attr("id", "31000000000-1550000000")
                .attr("subject", "Family")
                .build(),
        ])
        .build()])
        .build();
    server.send_node(&harness, &reply).await;

    let groups = request.await.unwrap().unwrap();
    assert_eq!(groups.len(), 2);
    assert_eq!(groups[0].jid.to_string(), "31000000000-1441234567@g.us");
    assert_eq!(groups[0].subject, "Weekend plans");
    assert_eq!(groups[0].participants.len(), 2);
    assert!(groups[0].participants[0].admin);
    assert!(!groups[0].participants[1].admin);
    assert_eq!(groups[1].subject, "Family");

    match harness.next_event().await {
        Event::GroupList(list) => assert_eq!(list.groups.len(), 2),
        other => panic!("expected GroupList, got {other:?}"),
    }
}

#[tokio::test]
async fn test_participant_notification_is_acked_then_emitted() {
    let (mut harness, mut server, _read_task) = logged_in_harness().await;
    drain_post_login(&mut harness, &mut server).await;

    let notification = NodeBuilder::new("notification")
        .attr("from", "31000000000-1441234567@g.us")
        .attr("id", "n-42")
        .attr("type", "participant")
        .attr("participant", "49123@s.whatsapp.net")
        .children([NodeBuilder::new("add").children([NodeBuilder::new("participant")
            .attr("jid", "49123@s.whatsapp.net")
            .build()])
        .build()])
        .build();
    server.send_node(&harness, &notification).await;

    let ack = server.next_node(&mut harness).await;
    assert_eq!(ack.tag, "ack");
    let mut attrs = ack.attrs();
    assert_eq!(attrs.optional_string("class"), Some("notification"));
    assert_eq!(attrs.optional_string("id"), Some("n-42"));
    assert_eq!(attrs.optional_string("type"), Some("participant"));
    assert_eq!(
        attrs.optional_string("participant"),
        Some("49123@s.whatsapp.net")
    );

    match harness.next_event().await {
        Event::GroupParticipantsChanged(changed) => {
            assert_eq!(changed.group.to_string(), "31000000000-1441234567@g.us");
            assert_eq!(changed.change, ParticipantChange::Add);
            assert_eq!(changed.participants.len(), 1);
            assert_eq!(changed.participants[0].user, "49123");
        }
        other => panic!("expected GroupParticipantsChanged, got {other:?}"),
    }
}

#[tokio::test]
async fn test_subject_notification_emits_typed_event() {
    let (mut harness, mut server, _read_task) = logged_in_harness().await;
    drain_post_login(&mut harness, &mut server).await;

    let notification = NodeBuilder::new("notification")
        .attr("from", "31000000000-1441234567@g.us")
        .attr("id", "n-43")
        .attr("type", "subject")
        .attr("participant", "31000000000@s.whatsapp.net")
        .attr("t", "1700000000")
        .children([NodeBuilder::new("body")
            .bytes(b"New subject".to_vec())
            .build()])
        .build();
    server.send_node(&harness, &notification).await;

    let ack = server.next_node(&mut harness).await;
    assert_eq!(ack.tag, "ack");

    match harness.next_event().await {
        Event::GroupSubjectChanged(changed) => {
            assert_eq!(changed.subject, "New subject");
            assert_eq!(changed.group.to_string(), "31000000000-1441234567@g.us");
            assert_eq!(
                changed.author.as_ref().map(|j| j.to_string()),
                Some("31000000000@s.whatsapp.net".to_string())
            );
        }
        other => panic!("expected GroupSubjectChanged, got {other:?}"),
    }
}
