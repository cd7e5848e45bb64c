use std::{
    thread,
    time::{Duration, Instant},
};

use anyhow::{anyhow, Context};
use embedded_svc::{
    http::Method,
    io::Write,
    wifi::{AuthMethod, ClientConfiguration, Configuration},
};
use esp_idf_hal::gpio::{AnyInputPin, Input, InputPin, PinDriver};
use esp_idf_svc::{
    eventloop::EspSystemEventLoop,
    hal::{delay::FreeRtos, modem::Modem, prelude::Peripherals},
    http::server::{ws::EspHttpWsConnection, Configuration as HttpConfiguration, EspHttpServer},
    log::EspLogger,
    mdns::EspMdns,
    nvs::EspDefaultNvsPartition,
    wifi::{BlockingWifi, EspWifi},
    ws::FrameType,
};
use log::{debug, info, warn};

use powermeter_common::{
    config::NetworkConfig, respond, CalibrationProfile, Inbound, LatestPeriod, Level, PulseInput,
    PulseSampler, RuntimeConfig,
};

use crate::page;

const SENSOR_PIN: i32 = 4;

const WATCHDOG_TIMEOUT_SEC: u32 = 30;
const WIFI_RETRY_DELAY_MS: u64 = 100;
const WS_CTRL_PORT: u16 = 32_769;
const MAX_WS_FRAME: usize = 4096;
const SAMPLER_REPORT_INTERVAL: Duration = Duration::from_secs(10);

/// Times pulses on a GPIO by polling, the way `pulseIn` does: skip any pulse
/// already in progress, wait for the next one to start, then time it.
struct GpioPulseInput {
    pin: PinDriver<'static, AnyInputPin, Input>,
}

impl GpioPulseInput {
    fn new(pin: AnyInputPin) -> anyhow::Result<Self> {
        let pin = PinDriver::input(pin)?;
        Ok(Self { pin })
    }

    fn wait_while(&self, high: bool, start: Instant, timeout: Duration) -> bool {
        while self.pin.is_high() == high {
            if start.elapsed() >= timeout {
                return false;
            }
        }
        true
    }
}

impl PulseInput for GpioPulseInput {
    fn pulse_width(&mut self, level: Level, timeout_us: u32) -> Option<u32> {
        let high = level == Level::High;
        let timeout = Duration::from_micros(timeout_us.into());
        let start = Instant::now();

        if !self.wait_while(high, start, timeout) || !self.wait_while(!high, start, timeout) {
            return None;
        }

        let pulse_start = Instant::now();
        if !self.wait_while(high, start, timeout) {
            return None;
        }

        Some(u32::try_from(pulse_start.elapsed().as_micros()).unwrap_or(u32::MAX))
    }
}

pub fn run() -> anyhow::Result<()> {
    esp_idf_svc::sys::link_patches();
    EspLogger::initialize_default();

    let sys_loop = EspSystemEventLoop::take()?;
    let nvs_partition = EspDefaultNvsPartition::take()?;

    let mut runtime = RuntimeConfig::default();
    apply_build_config(&mut runtime);
    runtime.sanitize();

    info!(
        "profile `{}`, phase timeout {} us, policy {:?}",
        runtime.profile.as_str(),
        runtime.phase_timeout_us(),
        runtime.sampler.timeout_policy
    );

    let Peripherals { modem, pins, .. } = Peripherals::take()?;

    let input = GpioPulseInput::new(pins.gpio4.downgrade_input())
        .with_context(|| format!("failed to configure sensor input on GPIO{SENSOR_PIN}"))?;

    let wifi = connect_wifi(modem, sys_loop, nvs_partition, &runtime.network)
        .context("wifi startup failed")?;
    info!("Connected!");

    let _mdns = start_mdns(&runtime.network);

    let latest = LatestPeriod::new();
    let page_server = create_page_server(&runtime)?;
    let ws_server = create_ws_server(&runtime.network, latest.clone())?;

    init_watchdog(WATCHDOG_TIMEOUT_SEC)?;
    add_current_task_to_watchdog()?;

    let mut sampler = PulseSampler::new(
        input,
        runtime.phase_timeout_us(),
        runtime.sampler.timeout_policy,
        latest,
    );

    // Keep services alive for the program lifetime.
    let _wifi = wifi;
    let _page_server = page_server;
    let _ws_server = ws_server;
    let mut last_report = Instant::now();

    loop {
        feed_watchdog();

        let period = sampler.sample();
        if last_report.elapsed() >= SAMPLER_REPORT_INTERVAL {
            let stats = sampler.stats();
            info!(
                "latest period {} us ({} samples, {} timed-out phases)",
                period.as_micros(),
                stats.samples,
                stats.timed_out_phases
            );
            last_report = Instant::now();
        }

        // Let the idle task run between busy-polled measurements.
        FreeRtos::delay_ms(1);
    }
}

fn apply_build_config(runtime: &mut RuntimeConfig) {
    runtime.network.wifi_ssid = option_env!("WIFI_SSID").unwrap_or("CHANGE_ME").to_string();
    runtime.network.wifi_pass = option_env!("WIFI_PASS").unwrap_or("CHANGE_ME").to_string();

    if let Some(value) = option_env!("POWERMETER_PROFILE") {
        match value.parse::<CalibrationProfile>() {
            Ok(profile) => runtime.profile = profile,
            Err(err) => warn!("ignoring POWERMETER_PROFILE: {err}"),
        }
    }
}

fn create_page_server(runtime: &RuntimeConfig) -> anyhow::Result<EspHttpServer<'static>> {
    let conf = HttpConfiguration {
        http_port: runtime.network.http_port,
        stack_size: 8 * 1024,
        ..Default::default()
    };

    let mut server = EspHttpServer::new(&conf)?;
    let html = page::render(
        runtime.profile,
        runtime.network.ws_port,
        runtime.monitor.sampling_interval_ms,
    );

    server.fn_handler::<anyhow::Error, _>("/", Method::Get, move |req| {
        req.into_response(200, Some("OK"), &[("Content-Type", "text/html")])?
            .write_all(html.as_bytes())?;
        Ok(())
    })?;

    info!("page server listening on port {}", runtime.network.http_port);
    Ok(server)
}

fn create_ws_server(
    network: &NetworkConfig,
    latest: LatestPeriod,
) -> anyhow::Result<EspHttpServer<'static>> {
    let conf = HttpConfiguration {
        http_port: network.ws_port,
        ctrl_port: WS_CTRL_PORT,
        stack_size: 8 * 1024,
        ..Default::default()
    };

    let mut server = EspHttpServer::new(&conf)?;

    server.ws_handler("/", move |ws: &mut EspHttpWsConnection| -> anyhow::Result<()> {
        if ws.is_new() {
            info!("websocket session {} opened", ws.session());
            return Ok(());
        }
        if ws.is_closed() {
            info!("websocket session {} closed", ws.session());
            return Ok(());
        }

        let (frame_type, len) = ws.recv(&mut [])?;
        if len > MAX_WS_FRAME {
            warn!("websocket frame of {len} bytes exceeds {MAX_WS_FRAME}; closing session");
            ws.send(FrameType::Close, &[])?;
            return Ok(());
        }

        let mut buf = vec![0_u8; len];
        ws.recv(&mut buf)?;

        let period = latest.load();
        let inbound = match frame_type {
            FrameType::Text(_) => {
                // Text frames arrive NUL-terminated.
                let text = core::str::from_utf8(&buf).unwrap_or_default();
                let text = text.trim_end_matches('\0');
                info!("period request `{text}` -> {} us", period.as_micros());
                Inbound::Text(text)
            }
            FrameType::Binary(_) => {
                debug!("echoing {len} byte(s)");
                Inbound::Binary(&buf)
            }
            _ => Inbound::Closed,
        };

        if let Some(reply) = respond(inbound, period) {
            ws.send(FrameType::Binary(false), reply.as_bytes())?;
        }
        Ok(())
    })?;

    info!("websocket server listening on port {}", network.ws_port);
    Ok(server)
}

fn start_mdns(network: &NetworkConfig) -> Option<EspMdns> {
    let result = EspMdns::take().and_then(|mut mdns| {
        mdns.set_hostname(&network.hostname)?;
        mdns.add_service(None, "_http", "_tcp", network.http_port, &[])?;
        Ok(mdns)
    });

    match result {
        Ok(mdns) => {
            info!("mDNS responder started as `{}.local`", network.hostname);
            Some(mdns)
        }
        Err(err) => {
            warn!("Error setting up MDNS responder: {err:?}");
            None
        }
    }
}

fn connect_wifi(
    modem: Modem,
    sys_loop: EspSystemEventLoop,
    nvs_partition: EspDefaultNvsPartition,
    network: &NetworkConfig,
) -> anyhow::Result<EspWifi<'static>> {
    let mut esp_wifi = EspWifi::new(modem, sys_loop.clone(), Some(nvs_partition))?;
    let mut wifi = BlockingWifi::wrap(&mut esp_wifi, sys_loop)?;

    let auth_method = if network.wifi_pass.is_empty() {
        AuthMethod::None
    } else {
        AuthMethod::WPAWPA2Personal
    };

    wifi.set_configuration(&Configuration::Client(ClientConfiguration {
        ssid: network
            .wifi_ssid
            .as_str()
            .try_into()
            .map_err(|_| anyhow!("wifi ssid too long"))?,
        password: network
            .wifi_pass
            .as_str()
            .try_into()
            .map_err(|_| anyhow!("wifi password too long"))?,
        auth_method,
        ..Default::default()
    }))?;

    wifi.start()?;
    info!("wifi started, connecting to `{}`", network.wifi_ssid);

    // Retry forever with a fixed delay.
    let mut attempt: u32 = 0;
    loop {
        attempt = attempt.saturating_add(1);
        match wifi.connect() {
            Ok(()) => match wifi.wait_netif_up() {
                Ok(()) => {
                    info!("wifi connected and netif up on attempt {attempt}");
                    break;
                }
                Err(err) => debug!("wifi netif up failed on attempt {attempt}: {err:#}"),
            },
            Err(err) => debug!("wifi connect failed on attempt {attempt}: {err:#}"),
        }

        let _ = wifi.disconnect();
        thread::sleep(Duration::from_millis(WIFI_RETRY_DELAY_MS));
    }

    Ok(esp_wifi)
}

fn init_watchdog(timeout_sec: u32) -> anyhow::Result<()> {
    let config = esp_idf_svc::sys::esp_task_wdt_config_t {
        timeout_ms: timeout_sec.saturating_mul(1000),
        idle_core_mask: 0,
        trigger_panic: true,
    };
    let rc = unsafe { esp_idf_svc::sys::esp_task_wdt_init(&config) };
    if rc == esp_idf_svc::sys::ESP_OK || rc == esp_idf_svc::sys::ESP_ERR_INVALID_STATE {
        return Ok(());
    }
    Err(anyhow!("esp_task_wdt_init failed with code {}", rc))
}

fn add_current_task_to_watchdog() -> anyhow::Result<()> {
    let rc = unsafe { esp_idf_svc::sys::esp_task_wdt_add(core::ptr::null_mut()) };
    if rc == esp_idf_svc::sys::ESP_OK || rc == esp_idf_svc::sys::ESP_ERR_INVALID_STATE {
        return Ok(());
    }
    Err(anyhow!("esp_task_wdt_add failed with code {}", rc))
}

fn feed_watchdog() {
    let _ = unsafe { esp_idf_svc::sys::esp_task_wdt_reset() };
}
