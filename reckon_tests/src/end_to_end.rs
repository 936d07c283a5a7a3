use crate::stepper::{Stepper, FRAME_DELTA};
use approx::assert_relative_eq;
use bevy_math::{Quat, Vec3};
use reckon::prelude::*;
use smallvec::smallvec;
use test_log::test;

#[test]
fn observer_tracks_owner_motion_without_popping() {
    let mut stepper = Stepper::new(5);
    let entity = EntityId(1);
    let owner = PeerId(2);
    stepper.spawn(entity, owner, false);

    // the owner moves at a steady 1 unit/s, submitting every frame
    let mut last_rendered = 0.0f32;
    for _ in 0..120 {
        let t = stepper.time();
        stepper.submit_transform(entity, owner, Vec3::new(t, 0.0, 0.0), Quat::IDENTITY, t);
        stepper.frame_step();

        let rendered = stepper.rendered(entity).position.x;
        if stepper.frame > 30 {
            let authoritative = stepper.authority(entity).current().position.x;
            // zero jitter: the rendered position stays within a couple of
            // frames of the authoritative one
            assert!(
                (rendered - authoritative).abs() < 0.2,
                "frame {}: rendered {rendered} vs authoritative {authoritative}",
                stepper.frame
            );
            // and never pops backwards
            assert!(rendered >= last_rendered - 1e-3);
        }
        last_rendered = rendered;
    }
}

#[test]
fn non_owner_submission_changes_nothing() {
    let mut stepper = Stepper::new(5);
    let entity = EntityId(1);
    stepper.spawn(entity, PeerId(7), false);

    assert!(stepper.submit_transform(
        entity,
        PeerId(7),
        Vec3::new(1.0, 0.0, 0.0),
        Quat::IDENTITY,
        0.1
    ));
    stepper.frame_step();

    // owner is 7, the imposter claims 5
    assert!(!stepper.submit_transform(
        entity,
        PeerId(5),
        Vec3::new(50.0, 0.0, 0.0),
        Quat::IDENTITY,
        0.2
    ));
    stepper.frame_step();
    assert_relative_eq!(
        stepper.authority(entity).current().position.x,
        1.0,
        epsilon = 1e-4
    );
}

#[test]
fn local_player_predicts_ahead_and_reconciles_smoothly() {
    let mut stepper = Stepper::new(5);
    let entity = EntityId(3);
    let owner = PeerId(4);
    stepper.spawn(entity, owner, true);

    // seed the predictor with the initial authoritative state
    stepper.frame_step();

    let step = Vec3::new(0.02, 0.0, 0.0);
    let mut last_rendered = f32::NEG_INFINITY;
    let mut last_input_time = None;
    for _ in 0..90 {
        let t = stepper.time();
        // the owner reports the predicted transform of its previous input
        // back to the authority before generating the next one
        if let Some(input_time) = last_input_time {
            let predicted = *stepper.rendered(entity);
            stepper.submit_transform(
                entity,
                owner,
                predicted.position,
                predicted.rotation,
                input_time,
            );
        }
        stepper.local_input(
            entity,
            PredictedInput {
                time: t,
                translation: step,
                rotation: Quat::IDENTITY,
                delta: FRAME_DELTA,
            },
        );
        last_input_time = Some(t);
        stepper.frame_step();

        // local input is visible immediately and reconciliation never drags
        // the entity backwards
        let rendered = stepper.rendered(entity).position.x;
        assert!(
            rendered >= last_rendered - 1e-4,
            "frame {}: rendered {rendered} popped below {last_rendered}",
            stepper.frame
        );
        last_rendered = rendered;
    }

    // ~90 inputs of 0.02 each
    let rendered = stepper.rendered(entity).position.x;
    assert!(
        (1.5..=2.0).contains(&rendered),
        "rendered {rendered} after 90 inputs"
    );
}

#[test]
fn teleport_flag_forces_an_exact_snap() {
    let mut stepper = Stepper::new(5);
    let entity = EntityId(9);
    let owner = PeerId(2);
    stepper.spawn(entity, owner, false);

    // build up motion so the predictor has velocity and corrections to skip
    for _ in 0..20 {
        let t = stepper.time();
        stepper.submit_transform(entity, owner, Vec3::new(t, 0.0, 0.0), Quat::IDENTITY, t);
        stepper.frame_step();
    }

    let destination = Vec3::new(100.0, 0.0, 0.0);
    let message = ServerTransformMessage {
        entity,
        position: destination,
        rotation: Quat::IDENTITY,
        scale: None,
        changed_properties: None,
        teleport: true,
        server_time: stepper.time() as f64,
        ack_client_time: None,
    };
    let sample = ServerFrameSample::from(&message);
    let clock = stepper.clock();
    stepper.room.server_frame(&clock, entity, &sample);
    stepper.room.client_frame(&clock);

    assert_eq!(stepper.rendered(entity).position, destination);
}

#[test]
fn property_changes_replicate_to_the_presented_map() {
    let mut stepper = Stepper::new(5);
    let entity = EntityId(11);
    stepper.spawn(entity, PeerId(2), false);

    let message = ServerTransformMessage {
        entity,
        position: Vec3::ZERO,
        rotation: Quat::IDENTITY,
        scale: None,
        changed_properties: Some(smallvec![
            (PropertyId(1), PropertyValue::Number(0.75)),
            (PropertyId(2), PropertyValue::Bool(true)),
        ]),
        teleport: false,
        server_time: 0.1,
        ack_client_time: None,
    };
    let bytes = reckon::core::message::encode(&message).unwrap();
    let decoded: ServerTransformMessage = reckon::core::message::decode(&bytes).unwrap();
    let sample = ServerFrameSample::from(&decoded);
    let clock = stepper.clock();
    stepper.room.server_frame(&clock, entity, &sample);
    stepper.room.client_frame(&clock);

    let properties = stepper.room.get(entity).unwrap().properties();
    assert_eq!(
        properties.get(PropertyId(1)),
        Some(&PropertyValue::Number(0.75))
    );
    assert_eq!(properties.get(PropertyId(2)), Some(&PropertyValue::Bool(true)));
}
