// SPDX-FileCopyrightText: © 2025 StreamKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

use super::backend_with;
use crate::ObjectArgs;
use mediagraph_core::ObjectClass;

#[tokio::test]
#[allow(clippy::expect_used)]
async fn test_every_source_keeps_a_consumer() {
    let (backend, _probe) = backend_with(&[]);
    let null = backend.null_sink();
    let media = backend.create_media_object().await.expect("media object");
    assert_eq!(backend.sinks_of(media.id()), vec![null]);

    let effect = backend
        .create_object(ObjectClass::Effect, ObjectArgs::default())
        .await
        .expect("effect");
    let out = backend
        .create_object(ObjectClass::AudioOutput, ObjectArgs::default())
        .await
        .expect("audio output");

    // A filter without upstream is left alone.
    backend.start_connection_change(&[effect]).await.expect("start");
    backend.end_connection_change(&[effect]).await.expect("end");
    assert!(backend.sinks_of(effect).is_empty());

    backend.connect_nodes(media.id(), effect).await.expect("connect effect");
    assert_eq!(backend.sinks_of(media.id()), vec![effect]);
    assert_eq!(backend.sinks_of(effect), vec![null]);

    backend.connect_nodes(effect, out).await.expect("connect output");
    assert_eq!(backend.sinks_of(effect), vec![out]);

    backend.release_node(effect).await.expect("release effect");
    assert!(backend.node(effect).is_none());
    assert_eq!(backend.sinks_of(media.id()), vec![null]);
    assert_eq!(backend.source_of(out), None);

    backend.shutdown().await.expect("shutdown");
}

#[tokio::test]
#[allow(clippy::expect_used)]
async fn test_closing_media_object_destroys_stream() {
    let (backend, _probe) = backend_with(&[]);
    let media = backend.create_media_object().await.expect("media object");
    let id = media.id();
    let out = backend
        .create_object(ObjectClass::AudioOutput, ObjectArgs::default())
        .await
        .expect("audio output");
    backend.connect_nodes(id, out).await.expect("connect");

    media.close().await.expect("close");
    assert!(backend.node(id).is_none());
    assert!(backend.media_object(id).is_none());
    assert_eq!(backend.source_of(out), None);
    assert!(backend.engine().has_video(id).await.is_err());

    backend.shutdown().await.expect("shutdown");
}
