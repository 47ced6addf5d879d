mod common;

use common::*;
use more_asserts::assert_ge;
use std::thread;
use tessera_render::EntityId;
use tessera_render::driver::recording::DriverCall;

#[test]
fn descriptions_dropped_elsewhere_are_deleted_on_the_render_thread() {
    let (mut render, log) = renderer(quiet_config());
    let description = lit_description();
    let instance = TestInstance::new(10, &description);
    render.add_entity(TestCamera::new(1));
    render.add_entity(instance.clone());
    render.frame((32, 32));
    assert_eq!(render.context().caches.vbos.live(), 1);

    assert!(render.remove_entity(EntityId(10)));
    log.lock().clear();

    thread::spawn(move || {
        drop(instance);
        drop(description);
    })
    .join()
    .expect("dropping thread should not panic");

    assert_eq!(log.lock().count(DriverCall::is_delete), 0);

    let stats = render.frame((32, 32));
    assert_eq!(stats.live_vbos, 0);

    let render_thread = thread::current().id();
    let log = log.lock();
    assert_ge!(log.count(|c| matches!(c, DriverCall::DeleteBuffer(_))), 1);
    assert_ge!(log.count(|c| matches!(c, DriverCall::DeleteProgram(_))), 1);
    assert!(log.recorded().iter().all(|r| r.thread == render_thread));
}

#[test]
fn released_objects_are_deleted_once() {
    let (mut render, log) = renderer(quiet_config());
    let description = lit_description();
    render.add_entity(TestCamera::new(1));
    render.add_entity(TestInstance::new(10, &description));
    render.frame((32, 32));

    render.remove_entity(EntityId(10));
    drop(description);
    render.frame((32, 32));
    let deletes = log.lock().count(DriverCall::is_delete);
    assert_ge!(deletes, 1);

    render.frame((32, 32));
    render.frame((32, 32));
    assert_eq!(log.lock().count(DriverCall::is_delete), deletes);
}

#[test]
fn dropping_the_renderer_deletes_everything_it_built() {
    let (mut render, log) = renderer(quiet_config());
    let description = lit_description();
    render.add_entity(TestCamera::new(1));
    render.add_entity(TestInstance::new(10, &description));
    render.frame((32, 32));

    let programs = log
        .lock()
        .count(|c| matches!(c, DriverCall::LinkProgram(Ok(_))));
    drop(render);

    let log = log.lock();
    assert_eq!(
        log.count(|c| matches!(c, DriverCall::DeleteProgram(_))),
        programs
    );
    // the shared description outlives the renderer without sending anything back
    drop(description);
}
