#![no_std]
#![no_main]
#![warn(clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions, clippy::wildcard_imports)]

use defmt_rtt as _;
use panic_probe as _;

/// Readings kept for the terminal, two minutes at the default sample interval
const HISTORY_LEN: usize = 64;

#[rtic::app(device = stm32f0xx_hal::pac, dispatchers = [USART1, TIM14])]
mod app {
    use defmt::{panic, unreachable, *};
    use rtic_boiler::{
        boiler::{Boiler, Tick},
        heater::PinHeater,
        storage::{settings::MemoryStore, History},
        terminal::{execute, get_line, is_newline, parse, print_error, Command, BUFFER_SIZE},
        thermometer::{max31855::Max31855, Temperature},
        Instant,
    };
    use rtic_monotonics::{
        stm32::{Tim2 as Mono, *},
        Monotonic,
    };
    use rtic_sync::{
        channel::{ReceiveError, Receiver, Sender},
        make_channel,
    };
    use stm32f0xx_hal::{
        gpio::{
            gpioa::{PA15, PA2, PA4, PA5, PA6, PA7},
            Alternate, Output, Pin, PushPull, AF0, AF1,
        },
        pac::{Interrupt, IWDG, SPI1, USART2},
        prelude::*,
        serial,
        serial::{Event, Serial},
        spi::{EightBit, Mode, Phase, Polarity, Spi},
        watchdog::Watchdog,
    };

    use crate::HISTORY_LEN;

    type Thermocouple = Max31855<
        Spi<SPI1, PA5<Alternate<AF0>>, PA6<Alternate<AF0>>, PA7<Alternate<AF0>>, EightBit>,
        PA4<Output<PushPull>>,
    >;
    type BoilerController = Boiler<Thermocouple, PinHeater<Pin<Output<PushPull>>>, MemoryStore>;

    /// MAX31855 clocks out on the falling edge, idle low
    const MAX31855_MODE: Mode = Mode {
        polarity: Polarity::IdleLow,
        phase: Phase::CaptureOnFirstTransition,
    };

    #[shared]
    struct Shared {
        usart: Serial<USART2, PA2<Alternate<AF1>>, PA15<Alternate<AF1>>>,
        buffer: heapless::Deque<u8, BUFFER_SIZE>,
        boiler: BoilerController,
        history: History<HISTORY_LEN>,
    }

    #[local]
    struct Local {
        tx: Sender<'static, Temperature, 1>,
    }

    /// Monotonic time in the control core's millisecond ticks
    fn now() -> Instant {
        Instant::from_ticks(u64::from(Mono::now().duration_since_epoch().to_millis()))
    }

    #[init]
    fn init(mut cx: init::Context) -> (Shared, Local) {
        // Set system clock to 24 MHz
        let mut rcc = cx
            .device
            .RCC
            .configure()
            .hsi48()
            .sysclk(24.mhz())
            .pclk(24.mhz())
            .hclk(24.mhz())
            .freeze(&mut cx.device.FLASH);

        trace!("sysclk: {}", rcc.clocks.sysclk().0);
        trace!("hclk: {}", rcc.clocks.hclk().0);
        trace!("pclk: {}", rcc.clocks.pclk().0);

        // Enable tim2 monotonic
        let token = rtic_monotonics::create_stm32_tim2_monotonic_token!();
        Mono::start(24_000_000, token);

        // Setup GPIO
        let gpioa = cx.device.GPIOA.split(&mut rcc);
        let gpiob = cx.device.GPIOB.split(&mut rcc);
        let pb3 = gpiob.pb3.into_push_pull_output(&cx.cs);

        let _ = blinky::spawn(pb3.downgrade());
        let _ = watchdog::spawn(cx.device.IWDG);

        // Setup USART & USART interrupt
        let mut usart = Serial::usart2(
            cx.device.USART2,
            (
                gpioa.pa2.into_alternate_af1(&cx.cs),
                gpioa.pa15.into_alternate_af1(&cx.cs),
            ),
            115_200.bps(),
            &mut rcc,
        );
        usart.listen(Event::Rxne);
        rtic::pend(Interrupt::USART2);

        // Setup heater, off before anything else runs
        let heater = PinHeater::new(gpiob.pb4.into_push_pull_output(&cx.cs).downgrade());

        // Setup MAX31855 on SPI1
        let spi = Spi::spi1(
            cx.device.SPI1,
            (
                gpioa.pa5.into_alternate_af0(&cx.cs),
                gpioa.pa6.into_alternate_af0(&cx.cs),
                gpioa.pa7.into_alternate_af0(&cx.cs),
            ),
            MAX31855_MODE,
            1.mhz(),
            &mut rcc,
        );
        let thermocouple = Max31855::new(spi, gpioa.pa4.into_push_pull_output(&cx.cs));

        let boiler = Boiler::new(thermocouple, heater, MemoryStore::new());

        // Setup channels
        let (tx, rx) = make_channel!(Temperature, 1);

        // Launch control and history tasks
        let _ = control::spawn();
        let _ = history::spawn(rx);

        (
            Shared {
                usart,
                buffer: heapless::Deque::new(),
                boiler,
                history: History::new(),
            },
            Local { tx },
        )
    }

    #[idle]
    fn idle(_: idle::Context) -> ! {
        rtic::pend(Interrupt::USART2);

        loop {
            cortex_m::asm::wfi();
        }
    }

    #[task(priority = 1)]
    async fn blinky(_: blinky::Context, mut pin: Pin<Output<PushPull>>) {
        unwrap!(pin.set_low());
        let mut now = Mono::now();
        loop {
            unwrap!(pin.toggle());
            now += 500.millis();
            Mono::delay_until(now).await;
        }
    }

    #[task(priority = 1)]
    async fn watchdog(_: watchdog::Context, wdg: IWDG) {
        let mut wdg = Watchdog::new(wdg);
        wdg.start(1.hz());

        loop {
            wdg.feed();
            Mono::delay(100.millis()).await;
        }
    }

    /// Polls the boiler, which runs a control step once per sample interval
    #[task(priority = 2, local = [tx], shared = [boiler])]
    async fn control(mut cx: control::Context) {
        let mut next = Mono::now();

        loop {
            match cx.shared.boiler.lock(|boiler| boiler.tick(now())) {
                Tick::Skipped => {}
                Tick::Fault(fault) => debug!("Control tick skipped reading: {}", fault),
                Tick::Reading { temp, heating } => {
                    debug!(
                        "Temperature: {=f32}, Heater: {=bool}",
                        temp.to_num::<f32>(),
                        heating
                    );
                    if cx.local.tx.try_send(temp).is_err() {
                        warn!("History busy, reading dropped");
                    }
                }
            }

            next += 100.millis();
            Mono::delay_until(next).await;
        }
    }

    #[task(priority = 1, shared = [history])]
    async fn history(mut cx: history::Context, mut rx: Receiver<'static, Temperature, 1>) {
        loop {
            let temp = match rx.recv().await {
                Ok(temp) => temp,
                Err(ReceiveError::Empty) => continue,
                Err(ReceiveError::NoSender) => unreachable!("Sender dropped"),
            };

            cx.shared.history.lock(|history| history.write(temp, now()));
        }
    }

    #[task(priority = 2, shared = [usart, buffer, boiler, history])]
    async fn terminal(cx: terminal::Context) {
        let mut reset = false;

        (
            cx.shared.usart,
            cx.shared.buffer,
            cx.shared.boiler,
            cx.shared.history,
        )
            .lock(|usart, buffer, boiler, history| {
                while let Some(line) = get_line(buffer) {
                    let res = match parse(&line) {
                        Ok(Some(cmd)) => {
                            reset |= cmd == Command::Reset;
                            execute(cmd, boiler, history, usart, now())
                        }
                        Ok(None) => Ok(()),
                        Err(e) => print_error(usart, e),
                    };
                    if res.is_err() {
                        panic!("Failed to write to UART");
                    }
                }
            });

        if reset {
            cortex_m::peripheral::SCB::sys_reset();
        }
    }

    #[task(binds = USART2, local = [times: u32 = 0], shared = [usart, buffer])]
    fn usart2(cx: usart2::Context) {
        *cx.local.times += 1;

        // Read & echo all available bytes from the usart
        (cx.shared.usart, cx.shared.buffer).lock(|usart, buffer| loop {
            match usart.read() {
                Ok(b) => {
                    // Echo back
                    if is_newline(b) {
                        let _ = nb::block!(usart.write(b'\r'));
                        let _ = nb::block!(usart.write(b'\n'));
                    } else {
                        let _ = nb::block!(usart.write(b));
                    }

                    // Append to buffer, dropping the line if it does not fit
                    if buffer.push_back(b).is_err() {
                        warn!("Terminal buffer overflow");
                        buffer.clear();
                    }
                }
                Err(nb::Error::WouldBlock) => break,
                Err(nb::Error::Other(serial::Error::Framing)) => {
                    panic!("USART error: Framing");
                }
                Err(nb::Error::Other(serial::Error::Noise)) => panic!("USART error: Noise"),
                Err(nb::Error::Other(serial::Error::Overrun)) => {
                    panic!("USART error: Overrun");
                }
                Err(nb::Error::Other(serial::Error::Parity)) => {
                    panic!("USART error: Parity");
                }
                Err(nb::Error::Other(_)) => panic!("USART error: Unknown"),
            }
        });

        trace!("USART2 interrupt fired: {}", *cx.local.times);

        // Trigger terminal task to handle input
        let _ = terminal::spawn();
    }

    timestamp!("{=u64:us}", {
        Mono::now().duration_since_epoch().to_micros()
    });
}
