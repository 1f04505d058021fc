//! End-to-end dispatcher scenarios over the mock platform: a device table
//! and registry driven exactly the way the event loop drives them, with a
//! recording backend in place of uinput.

use std::cell::Cell;
use std::io::Write;
use std::path::PathBuf;
use std::rc::Rc;

use tempfile::TempDir;

use remapd_core::DeviceId;
use remapd_daemon::daemon::{DaemonContext, DeviceEvent};
use remapd_daemon::device_manager::{Capabilities, Device};
use remapd_daemon::platform::mock::{MockHandle, MockOutput, SinkEvent};
use remapd_daemon::sink::VIRTUAL_DEVICE_NAME;

const KEYS: Capabilities = Capabilities {
    keys: true,
    rel: false,
    abs: false,
};
const POINTER: Capabilities = Capabilities {
    keys: false,
    rel: true,
    abs: false,
};

fn context_with(configs: &[(&str, &str)]) -> (DaemonContext, MockOutput, TempDir) {
    let dir = tempfile::tempdir().expect("tempdir failed");
    for (name, text) in configs {
        let mut f = std::fs::File::create(dir.path().join(name)).expect("create failed");
        f.write_all(text.as_bytes()).expect("write failed");
    }
    let mock = MockOutput::new();
    let ctx = DaemonContext::new(Box::new(mock.clone()), dir.path().to_path_buf())
        .expect("context init failed");
    (ctx, mock, dir)
}

fn add_device(
    ctx: &mut DaemonContext,
    name: &str,
    id: DeviceId,
    caps: Capabilities,
) -> (usize, Rc<Cell<bool>>) {
    let (handle, grabbed) = MockHandle::new();
    let index = ctx.devices().len();
    ctx.add_device(Device::new(
        PathBuf::from(format!("/dev/input/event{index}")),
        name.to_string(),
        id,
        caps,
        Box::new(handle),
    ));
    (index, grabbed)
}

#[test]
fn scenario_a_basic_remap() {
    let (mut ctx, mock, _dir) = context_with(&[(
        "logitech.conf",
        "[ids]\n046d:c52b\n[main]\na = b\n",
    )]);
    let (index, grabbed) = add_device(
        &mut ctx,
        "Logitech Receiver",
        DeviceId::new(0x046d, 0xc52b),
        KEYS,
    );
    assert!(grabbed.get(), "matching keyboard must be grabbed");

    let delay = ctx.dispatch(
        index,
        DeviceEvent::Key {
            code: 30,
            pressed: true,
        },
        0,
    );
    assert_eq!(delay, 0);
    assert_eq!(
        mock.key_events(),
        vec![(48, true)],
        "code 30 must be rewritten to 48"
    );
    assert!(ctx.sink().borrow().is_pressed(48));
    assert!(!ctx.sink().borrow().is_pressed(30));
}

#[test]
fn scenario_b_scroll_clears_oneshot() {
    let (mut ctx, mock, _dir) = context_with(&[(
        "oneshot.conf",
        "[ids]\n1111:2222\n[main]\nspace = oneshot(sym)\n[sym]\na = minus\n",
    )]);
    let (index, _) = add_device(&mut ctx, "Oneshot KB", DeviceId::new(0x1111, 0x2222), KEYS);

    let delay = ctx.dispatch(
        index,
        DeviceEvent::Key {
            code: 57,
            pressed: true,
        },
        0,
    );
    assert_eq!(delay, 500, "oneshot arms the timer");

    let ret = ctx.dispatch(index, DeviceEvent::MouseScroll { dx: 0, dy: -1 }, 123);
    assert_eq!(ret, 123, "scroll hands timeleft back unchanged");
    assert_eq!(
        mock.events(),
        vec![SinkEvent::Scroll { dx: 0, dy: -1 }],
        "the scroll reaches the sink after the synthetic button"
    );

    // The oneshot was consumed by the synthetic button press, so 'a' now
    // resolves through main.
    ctx.dispatch(
        index,
        DeviceEvent::Key {
            code: 30,
            pressed: true,
        },
        0,
    );
    assert_eq!(mock.key_events(), vec![(30, true)]);
}

#[test]
fn scenario_c_reload_drops_keys() {
    let (mut ctx, mock, _dir) = context_with(&[("kbd.conf", "[main]\na = b\n")]);
    let (index, grabbed) = add_device(&mut ctx, "Any KB", DeviceId::new(0x1, 0x2), KEYS);

    ctx.dispatch(
        index,
        DeviceEvent::Key {
            code: 30,
            pressed: true,
        },
        0,
    );
    assert!(ctx.sink().borrow().is_pressed(48));
    mock.clear();

    ctx.reload().expect("reload failed");

    assert_eq!(
        mock.key_events(),
        vec![(48, false)],
        "the clear releases the key the old keyboard left pressed"
    );
    assert_eq!(ctx.sink().borrow().pressed_count(), 0);
    assert!(grabbed.get(), "device is re-bound after reload");
    assert_eq!(ctx.last_kbd(), None);
    assert_eq!(ctx.devices().get(index).and_then(|d| d.binding()), Some(0));
}

#[test]
fn scenario_f_virtual_sink_is_filtered() {
    let (mut ctx, _mock, _dir) = context_with(&[("any.conf", "[main]\n")]);
    let (handle, grabbed) = MockHandle::new();
    ctx.add_device(Device::new(
        PathBuf::from("/dev/input/event9"),
        VIRTUAL_DEVICE_NAME.to_string(),
        DeviceId::new(0x0, 0x0),
        KEYS,
        Box::new(handle),
    ));
    assert_eq!(ctx.devices().len(), 0, "our own device never enters the table");
    assert!(!grabbed.get(), "no grab is attempted");
}

#[test]
fn unbound_device_leaves_the_timer_alone() {
    let (mut ctx, mock, _dir) = context_with(&[("only.conf", "[ids]\naaaa:bbbb\n[main]\n")]);
    let (index, grabbed) = add_device(&mut ctx, "Stranger", DeviceId::new(0x1, 0x2), KEYS);
    assert!(!grabbed.get());

    let ret = ctx.dispatch(
        index,
        DeviceEvent::Key {
            code: 30,
            pressed: true,
        },
        77,
    );
    assert_eq!(ret, 77);
    assert!(mock.events().is_empty());
    assert_eq!(ctx.last_kbd(), None);
}

#[test]
fn pointer_rank_binds_pointer_device_keyboard_rank_does_not() {
    let (mut ctx, _mock, _dir) = context_with(&[
        ("mouse.conf", "[ids]\nm:1111:2222\n[main]\n"),
        ("kbd.conf", "[ids]\n3333:4444\n[main]\n"),
    ]);
    let (_, mouse_grabbed) = add_device(
        &mut ctx,
        "Pointer",
        DeviceId::new(0x1111, 0x2222),
        POINTER,
    );
    let (_, stray_grabbed) = add_device(
        &mut ctx,
        "Pointer Two",
        DeviceId::new(0x3333, 0x4444),
        POINTER,
    );
    assert!(mouse_grabbed.get(), "rank 2 covers pointer devices");
    assert!(!stray_grabbed.get(), "rank 1 does not");
}

#[test]
fn mouse_motion_forwards_through_the_sink() {
    let (mut ctx, mock, _dir) = context_with(&[("all.conf", "[ids]\nm:*\n[main]\n")]);
    let (index, _) = add_device(&mut ctx, "Mouse", DeviceId::new(0x5, 0x6), POINTER);

    assert_eq!(
        ctx.dispatch(index, DeviceEvent::MouseMove { dx: 4, dy: -2 }, 9),
        9
    );
    assert_eq!(
        ctx.dispatch(index, DeviceEvent::MouseMoveAbs { x: 10, y: 20 }, 9),
        9
    );
    assert_eq!(
        mock.events(),
        vec![
            SinkEvent::Rel { dx: 4, dy: -2 },
            SinkEvent::Abs { x: 10, y: 20 },
        ]
    );
}

#[test]
fn timeout_ticks_the_last_active_keyboard() {
    let (mut ctx, _mock, _dir) = context_with(&[(
        "oneshot.conf",
        "[main]\nspace = oneshot(sym)\n[sym]\n",
    )]);
    let (index, _) = add_device(&mut ctx, "KB", DeviceId::new(0x1, 0x2), KEYS);

    assert_eq!(ctx.tick(), 0, "no last keyboard, no tick target");

    let delay = ctx.dispatch(
        index,
        DeviceEvent::Key {
            code: 57,
            pressed: true,
        },
        0,
    );
    assert_eq!(delay, 500);
    assert_eq!(ctx.last_kbd(), Some(0));

    // The tick expires the oneshot and requests no further timeout.
    assert_eq!(ctx.tick(), 0);
}

#[test]
fn press_release_replay_leaves_keystate_unchanged() {
    let (mut ctx, _mock, _dir) = context_with(&[("kbd.conf", "[main]\na = b\n")]);
    let (index, _) = add_device(&mut ctx, "KB", DeviceId::new(0x1, 0x2), KEYS);

    let replay = |ctx: &mut DaemonContext| {
        ctx.dispatch(
            index,
            DeviceEvent::Key {
                code: 30,
                pressed: true,
            },
            0,
        );
        ctx.dispatch(
            index,
            DeviceEvent::Key {
                code: 30,
                pressed: false,
            },
            0,
        );
    };

    replay(&mut ctx);
    let first = ctx.sink().borrow().pressed_count();
    replay(&mut ctx);
    assert_eq!(ctx.sink().borrow().pressed_count(), first);
    assert_eq!(first, 0);
}

#[test]
fn clear_after_arbitrary_traffic_releases_everything_once() {
    let (mut ctx, mock, _dir) = context_with(&[("kbd.conf", "[main]\na = b\n")]);
    let (index, _) = add_device(&mut ctx, "KB", DeviceId::new(0x1, 0x2), KEYS);

    for code in [30u8, 35, 50] {
        ctx.dispatch(
            index,
            DeviceEvent::Key {
                code,
                pressed: true,
            },
            0,
        );
    }
    mock.clear();
    ctx.sink().borrow_mut().clear();

    let mut released = mock.key_events();
    released.sort_unstable();
    assert_eq!(released, vec![(35, false), (48, false), (50, false)]);
    assert_eq!(ctx.sink().borrow().pressed_count(), 0);
}

#[test]
fn bindings_always_point_into_the_current_registry() {
    let (mut ctx, _mock, _dir) = context_with(&[
        ("a.conf", "[ids]\n1111:2222\n[main]\n"),
        ("b.conf", "[ids]\n3333:4444\n[main]\n"),
    ]);
    add_device(&mut ctx, "KB1", DeviceId::new(0x1111, 0x2222), KEYS);
    add_device(&mut ctx, "KB2", DeviceId::new(0x3333, 0x4444), KEYS);

    for index in 0..ctx.devices().len() {
        let device = ctx.devices().get(index).expect("missing device");
        let binding = device.binding().expect("device should be bound");
        assert!(device.is_grabbed());
        assert!(ctx.registry().get(binding).is_some());
    }
}
