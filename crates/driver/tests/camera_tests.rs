//! Integration tests driving the full camera facade over the simulated
//! backend: bring-up ordering, register control, streaming lifecycle, and
//! frame delivery invariants.

use std::io::Write;
use std::time::{Duration, Instant};

use driver::sim::SimBackend;
use driver::{CameraError, FrameSnapshot, Lumascope};
use protocol::{registers, DeviceIdentity, FrameFormat, UsbError};

const POLL_TIMEOUT: Duration = Duration::from_secs(5);

/// A small window keeps simulated frames cheap: 32x32x3 = 3072 bytes.
const SIDE: u32 = 32;
const FRAME_LEN: usize = (SIDE * SIDE * 3) as usize;

fn bring_up() -> (SimBackend, Lumascope<SimBackend>) {
    let backend = SimBackend::new_initialized();
    let mut camera = Lumascope::new(
        backend.clone(),
        DeviceIdentity::default(),
        FrameFormat::square(SIDE),
    );
    assert!(camera.find_initialized_camera().unwrap());
    camera.initialize_gpif().unwrap();
    camera.init_image_sensor().unwrap();
    (backend, camera)
}

fn wait_until(mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + POLL_TIMEOUT;
    while !condition() {
        assert!(Instant::now() < deadline, "timed out waiting for condition");
        std::thread::sleep(Duration::from_millis(5));
    }
}

fn wait_for_frame(
    camera: &Lumascope<SimBackend>,
    accept: impl Fn(&FrameSnapshot) -> bool,
) -> FrameSnapshot {
    let deadline = Instant::now() + POLL_TIMEOUT;
    loop {
        let frame = camera.latest_24bpp_buffer();
        if accept(&frame) {
            return frame;
        }
        assert!(Instant::now() < deadline, "timed out waiting for frame");
        std::thread::sleep(Duration::from_millis(5));
    }
}

#[test]
fn enumeration_returns_false_without_device() {
    let backend = SimBackend::new_initialized();
    backend.detach();

    let mut camera = Lumascope::new(backend, DeviceIdentity::default(), FrameFormat::square(SIDE));
    assert!(!camera.find_uninitialized_camera().unwrap());
    assert!(!camera.find_initialized_camera().unwrap());
    assert!(!camera.is_bound());
}

#[test]
fn enumeration_binds_matching_device() {
    let backend = SimBackend::new();
    let mut camera = Lumascope::new(backend, DeviceIdentity::default(), FrameFormat::square(SIDE));

    // Attached in bootloader state: only the loader scan matches.
    assert!(!camera.find_initialized_camera().unwrap());
    assert!(camera.find_uninitialized_camera().unwrap());
    assert!(camera.is_bound());
    assert_eq!(camera.product_id(), DeviceIdentity::default().product_id_loader);
}

#[test]
fn device_description_list_reflects_boot_state() {
    let loader = SimBackend::new();
    let camera = Lumascope::new(loader, DeviceIdentity::default(), FrameFormat::square(SIDE));
    let list = camera.device_description_list().unwrap();
    assert_eq!(list.len(), 1);
    assert!(list[0].contains("8613"));

    let initialized = SimBackend::new_initialized();
    let camera = Lumascope::new(initialized, DeviceIdentity::default(), FrameFormat::square(SIDE));
    let list = camera.device_description_list().unwrap();
    assert_eq!(list.len(), 1);
    assert!(list[0].contains("4720"));
}

#[test]
fn firmware_load_renumerates_device() {
    let backend = SimBackend::new();
    let mut camera = Lumascope::new(
        backend.clone(),
        DeviceIdentity::default(),
        FrameFormat::square(SIDE),
    );

    let mut hex = tempfile::NamedTempFile::new().unwrap();
    writeln!(hex, ":0300000002099260").unwrap();
    writeln!(hex, ":01008000E699").unwrap();
    writeln!(hex, ":00000001FF").unwrap();
    hex.flush().unwrap();

    assert!(camera.find_uninitialized_camera().unwrap());

    // No hex path configured yet.
    assert!(matches!(
        camera.load_firmware(),
        Err(CameraError::HexPathNotSet)
    ));

    camera.set_hex_path(hex.path());
    camera.load_firmware().unwrap();

    // The loader handle died with the renumeration; the camera state is now
    // discoverable under the camera product id.
    assert!(!camera.is_bound());
    assert!(backend.is_firmware_loaded());
    assert_eq!(backend.firmware_bytes(), 4);
    assert!(camera.find_initialized_camera().unwrap());
    assert_eq!(camera.product_id(), DeviceIdentity::default().product_id_camera);

    // Firmware load only applies to a bootloader-state binding.
    assert!(matches!(
        camera.load_firmware(),
        Err(CameraError::NotInLoaderState)
    ));
}

#[test]
fn sequencing_violations_are_rejected() {
    let backend = SimBackend::new_initialized();
    let mut camera = Lumascope::new(backend, DeviceIdentity::default(), FrameFormat::square(SIDE));

    // Nothing bound yet.
    assert!(matches!(
        camera.register_read(registers::GLOBAL_GAIN),
        Err(CameraError::NotBound)
    ));

    assert!(camera.find_initialized_camera().unwrap());

    // Register I/O and streaming before GPIF setup.
    assert!(matches!(
        camera.register_read(registers::GLOBAL_GAIN),
        Err(CameraError::GpifNotInitialized)
    ));
    assert!(matches!(
        camera.init_image_sensor(),
        Err(CameraError::GpifNotInitialized)
    ));
    assert!(matches!(
        camera.iso_stream_start(),
        Err(CameraError::GpifNotInitialized)
    ));

    camera.initialize_gpif().unwrap();

    // Streaming before the sensor power-up sequence.
    assert!(matches!(
        camera.iso_stream_start(),
        Err(CameraError::SensorNotInitialized)
    ));

    camera.init_image_sensor().unwrap();
    camera.iso_stream_start().unwrap();
    camera.iso_stream_stop();
}

#[test]
fn register_write_then_read_round_trips() {
    let (_backend, camera) = bring_up();

    let cases = [
        (registers::GLOBAL_GAIN, 100),
        (registers::RED_GAIN, 0x41),
        (registers::GREEN1_GAIN, 0x42),
        (registers::GREEN2_GAIN, 0x43),
        (registers::BLUE_GAIN, 0x44),
        (registers::SHUTTER_WIDTH_LOWER, 700),
        (registers::HORIZONTAL_BLANKING, 0x00F5),
    ];

    for (register, value) in cases {
        camera.register_write(register, value).unwrap();
        assert_eq!(camera.register_read(register).unwrap(), value);
    }
}

#[test]
fn gain_is_clamped_in_the_setter_only() {
    let (_backend, camera) = bring_up();
    let caps = *camera.capabilities().unwrap();

    // Values beyond the device-reported range clamp in the setter.
    assert_eq!(camera.set_global_gain(10_000).unwrap(), caps.max_global_gain);
    assert_eq!(
        camera.register_read(registers::GLOBAL_GAIN).unwrap(),
        caps.max_global_gain
    );
    assert_eq!(
        camera.set_global_gain(0).unwrap(),
        caps.recommended_min_global_gain
    );

    // Mark another register, then attempt a raw out-of-range write.
    camera.register_write(registers::RED_GAIN, 0x55).unwrap();
    let err = camera
        .register_write(registers::GLOBAL_GAIN, caps.max_global_gain + 1)
        .unwrap_err();
    assert!(matches!(err, CameraError::Usb(UsbError::Pipe)));

    // The failed write corrupted nothing.
    assert_eq!(
        camera.register_read(registers::GLOBAL_GAIN).unwrap(),
        caps.recommended_min_global_gain
    );
    assert_eq!(camera.register_read(registers::RED_GAIN).unwrap(), 0x55);
}

#[test]
fn transient_register_failures_are_retryable() {
    let (backend, camera) = bring_up();

    camera.register_write(registers::RED_GAIN, 0x21).unwrap();
    backend.set_fail_register_writes(true);

    let err = camera.register_write(registers::RED_GAIN, 0x7F).unwrap_err();
    assert!(matches!(err, CameraError::Usb(UsbError::Io)));
    assert!(err.is_retryable());

    // Previous register state held across the failure; the retry works.
    backend.set_fail_register_writes(false);
    assert_eq!(camera.register_read(registers::RED_GAIN).unwrap(), 0x21);
    camera.register_write(registers::RED_GAIN, 0x7F).unwrap();
    assert_eq!(camera.register_read(registers::RED_GAIN).unwrap(), 0x7F);
}

#[test]
fn exposure_is_clamped_to_device_maximum() {
    let (_backend, camera) = bring_up();
    let caps = *camera.capabilities().unwrap();

    assert_eq!(camera.set_exposure(200).unwrap(), 200);
    assert_eq!(
        camera.register_read(registers::SHUTTER_WIDTH_LOWER).unwrap(),
        200
    );

    assert_eq!(camera.set_exposure(u16::MAX).unwrap(), caps.max_exposure_rows);
    assert_eq!(
        camera.register_read(registers::SHUTTER_WIDTH_LOWER).unwrap(),
        caps.max_exposure_rows
    );
}

#[test]
fn pixel_clock_table_is_enumerated_and_validated() {
    let (_backend, camera) = bring_up();

    assert_eq!(camera.pixel_clock_description_count(), 3);
    assert_eq!(camera.pixel_clock_description(1), Some("24 MHz"));
    assert_eq!(camera.pixel_clock_description(3), None);

    camera.set_pixel_clock_frequency(2).unwrap();
    assert_eq!(
        camera.register_read(registers::PIXEL_CLOCK_CONTROL).unwrap(),
        2
    );

    assert!(matches!(
        camera.set_pixel_clock_frequency(3),
        Err(CameraError::InvalidPixelClockIndex { index: 3, count: 3 })
    ));
}

#[test]
fn streaming_delivers_complete_frames() {
    let (_backend, mut camera) = bring_up();

    camera.start_streaming().unwrap();
    assert!(camera.is_streaming());

    let frame = wait_for_frame(&camera, |f| f.complete);
    assert_eq!(frame.len(), FRAME_LEN);
    let fill = frame.data[0];
    assert!(frame.data.iter().all(|b| *b == fill));

    camera.stop_streaming();
    assert!(!camera.is_streaming());
}

#[test]
fn stop_is_idempotent_and_restart_resumes_frames() {
    let (_backend, mut camera) = bring_up();

    camera.iso_stream_start().unwrap();
    wait_for_frame(&camera, |f| f.complete);

    camera.iso_stream_stop();
    camera.iso_stream_stop(); // no-op, not an error

    // Double start is rejected, stop/start cycles cleanly.
    camera.iso_stream_start().unwrap();
    assert!(matches!(
        camera.iso_stream_start(),
        Err(CameraError::StreamingActive)
    ));
    wait_for_frame(&camera, |f| f.complete);
    camera.iso_stream_stop();
}

#[test]
fn concurrent_reads_never_observe_torn_frames() {
    let (_backend, mut camera) = bring_up();
    camera.start_streaming().unwrap();

    std::thread::scope(|s| {
        let mut readers = Vec::new();
        for _ in 0..4 {
            let camera = &camera;
            readers.push(s.spawn(move || {
                let deadline = Instant::now() + Duration::from_millis(500);
                let mut seen_frames = 0u32;
                while Instant::now() < deadline {
                    let frame = camera.latest_24bpp_buffer();
                    if frame.complete {
                        // Complete implies exactly one frame worth of a
                        // single fill value; a torn buffer would mix the
                        // fill values of two frames.
                        assert_eq!(frame.len(), FRAME_LEN);
                        let fill = frame.data[0];
                        assert!(frame.data.iter().all(|b| *b == fill));
                        seen_frames += 1;
                    } else {
                        assert!(frame.len() < FRAME_LEN);
                    }
                }
                seen_frames
            }));
        }

        let frames_seen: u32 = readers.into_iter().map(|r| r.join().unwrap()).sum();
        assert!(frames_seen > 0);
    });

    camera.stop_streaming();
}

#[test]
fn byte_counter_counts_received_stream_bytes() {
    let (backend, mut camera) = bring_up();

    // Two frames, then bus silence: delimiter + payload per frame.
    backend.limit_frames(2);
    let expected = 2 * (FRAME_LEN + 4) as u64;

    camera.reset_bytes_received();
    assert_eq!(camera.bytes_received(), 0);

    camera.start_streaming().unwrap();
    wait_until(|| camera.bytes_received() == expected);
    camera.stop_streaming();

    assert_eq!(camera.bytes_received(), expected);
    camera.reset_bytes_received();
    assert_eq!(camera.bytes_received(), 0);
}

#[test]
fn partial_frame_is_delivered_flagged_incomplete() {
    let (backend, mut camera) = bring_up();

    backend.set_partial_next_frame();
    camera.start_streaming().unwrap();

    let partial = wait_for_frame(&camera, |f| !f.is_empty());
    assert!(!partial.complete);
    assert_eq!(partial.len(), FRAME_LEN / 2);

    // Once data flows again, the stream resynchronizes on the next
    // delimiter and delivers complete frames.
    backend.clear_starvation();
    let frame = wait_for_frame(&camera, |f| f.complete);
    assert_eq!(frame.len(), FRAME_LEN);

    camera.stop_streaming();
}

#[test]
fn noise_frames_keep_the_complete_flag_honest() {
    let (backend, mut camera) = bring_up();
    backend.set_noise_frames(true);

    camera.start_streaming().unwrap();
    let frame = wait_for_frame(&camera, |f| f.complete);
    assert_eq!(frame.len(), FRAME_LEN);
    camera.stop_streaming();
}

#[test]
fn device_removal_fails_operations_until_rebind() {
    let (backend, mut camera) = bring_up();

    camera.start_streaming().unwrap();
    wait_for_frame(&camera, |f| f.complete);

    backend.detach();

    // The receive worker unwinds on the fatal error.
    wait_until(|| !camera.is_streaming());

    let err = camera.register_read(registers::GLOBAL_GAIN).unwrap_err();
    assert!(matches!(err, CameraError::Usb(UsbError::NoDevice)));
    assert!(!err.is_retryable());

    // Stop after removal stays a clean no-op.
    camera.iso_stream_stop();

    // Re-enumeration finds nothing until the device returns.
    camera.unbind();
    assert!(!camera.find_initialized_camera().unwrap());
}

#[test]
fn window_changes_are_blocked_while_streaming() {
    let (_backend, mut camera) = bring_up();

    // Larger than the device maximum, or degenerate.
    assert!(matches!(
        camera.set_window(2000, 2000),
        Err(CameraError::InvalidWindow { .. })
    ));
    assert!(matches!(
        camera.set_window(0, 64),
        Err(CameraError::InvalidWindow { .. })
    ));

    camera.start_streaming().unwrap();
    assert!(matches!(
        camera.set_window_size(64),
        Err(CameraError::StreamingActive)
    ));
    camera.stop_streaming();

    // Applies after stop; the next stream start uses the new geometry.
    camera.set_window_size(64).unwrap();
    assert_eq!(camera.frame_format(), FrameFormat::square(64));

    camera.start_streaming().unwrap();
    let frame = wait_for_frame(&camera, |f| f.complete);
    assert_eq!(frame.len(), 64 * 64 * 3);
    camera.stop_streaming();
}

#[test]
fn led_brightness_reaches_the_controller() {
    let (backend, camera) = bring_up();

    camera.led_write(1, 200).unwrap();
    assert_eq!(backend.led_brightness(1), Some(200));

    camera.led_write(0, 0).unwrap();
    assert_eq!(backend.led_brightness(0), Some(0));

    assert!(matches!(
        camera.led_write(9, 10),
        Err(CameraError::Usb(UsbError::InvalidParam))
    ));
}

#[test]
fn latest_buffer_is_empty_before_first_frame() {
    let (_backend, camera) = bring_up();

    let frame = camera.latest_24bpp_buffer();
    assert!(!frame.complete);
    assert!(frame.is_empty());
}
