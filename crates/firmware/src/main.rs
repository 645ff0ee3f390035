//! Synth Transformer is [Embassy](https://embassy.dev)-based firmware for a box that sits between a MIDI controller
//! and a synthesizer, rewriting the controller's CC numbers into the ones the synthesizer understands. The firmware
//! runs on the [Nucleo-F767ZI development board](https://www.st.com/en/evaluation-tools/nucleo-f767zi.html), which
//! is powered by an F7-series STM32 microcontroller.
//!
//! The controller plugs into the board's USB port, which enumerates as a composite device: a MIDI interface for the
//! controller and a serial interface for the preset editor. Rewritten messages leave through a DIN MIDI socket.
//! Presets live on an I2C EEPROM and are browsed with the user button and a 16x2 character LCD.
//!
//! All configuration logic lives in `synth_transformer_lib`; this crate wires it to the hardware.

#![no_std]
#![no_main]

extern crate alloc;

mod eeprom;
mod editor_link;
mod lcd;
mod midi;
mod panel;

use crate::{
    eeprom::Eeprom,
    editor_link::{EditorLink, Inbox, MAX_PACKET_SIZE, UsbDriver},
    lcd::Lcd,
    midi::{DinMidiOut, MidiQueue, UsbMidiIn},
    panel::{PresetButton, StatusLed},
};
use defmt::*;
use embassy_executor::Spawner;
use embassy_stm32::{
    Config, bind_interrupts,
    gpio::{Input, Level, Output, Pull, Speed},
    i2c::{self, I2c},
    peripherals,
    time::Hertz,
    usart::{self, UartTx},
    usb,
};
use embassy_time::Timer;
use embassy_usb::{
    Builder, UsbDevice,
    class::{
        cdc_acm::{self, CdcAcmClass, Receiver},
        midi::MidiClass,
    },
};
use embedded_alloc::LlffHeap as Heap;
use static_cell::StaticCell;
use synth_transformer_lib::{
    configuration::DeviceConfig,
    io::{Board, Io},
    program::Program,
};

use {defmt_rtt as _, panic_probe as _};

#[global_allocator]
static HEAP: Heap = Heap::empty();

/// Room for the settings, one editor message and the serializer's scratch space.
const HEAP_SIZE: usize = 64 * 1024;

bind_interrupts!(
    #[doc(hidden)]
    struct Irqs {
        OTG_FS => usb::InterruptHandler<peripherals::USB_OTG_FS>;
    }
);

/// MIDI messages from the controller, produced by [`midi_task`].
static MIDI_QUEUE: MidiQueue = MidiQueue::new();

/// Bytes from the editor, produced by [`editor_task`].
static EDITOR_INBOX: Inbox = Inbox::new();

#[doc(hidden)]
struct Nucleo;

impl Board for Nucleo {
    type Storage = Eeprom;
    type Transport = EditorLink;
    type Display = Lcd;
    type Button = PresetButton;
    type MidiIn = UsbMidiIn;
    type MidiOut = DinMidiOut;
    type Indicator = StatusLed;
}

#[embassy_executor::main]
async fn main(spawner: Spawner) {
    info!("Initializing Synth Transformer");

    {
        use core::mem::MaybeUninit;
        static mut HEAP_MEM: [MaybeUninit<u8>; HEAP_SIZE] = [MaybeUninit::uninit(); HEAP_SIZE];
        // SAFETY: runs once, before anything allocates
        unsafe { HEAP.init(&raw mut HEAP_MEM as usize, HEAP_SIZE) }
    }

    let mut config = Config::default();
    {
        use embassy_stm32::rcc::*;
        // hse: high-speed external clock
        config.rcc.hse = Some(Hse {
            freq: Hertz(8_000_000),
            mode: HseMode::Bypass,
        });

        // pll: phase-locked loop, crucial for dividing clock
        config.rcc.pll_src = PllSource::HSE;
        config.rcc.pll = Some(Pll {
            prediv: PllPreDiv::DIV4,
            mul: PllMul::MUL216,
            divp: Some(PllPDiv::DIV2), // 8mhz / 4 * 216 / 2 = 216Mhz
            // per section 5.2 of RM0410: most peripheral clocks are derived from their bus clock, but the 48MHz clock used for USB OTG FS
            // is derived from main PLL VCO (PLLQ clock) or PLLSAI VCO (PLLSAI clock)
            divq: Some(PllQDiv::DIV9), // 8mhz / 4 * 216 / 9 = 48Mhz
            divr: None,
        });
        config.rcc.ahb_pre = AHBPrescaler::DIV1;
        config.rcc.apb1_pre = APBPrescaler::DIV4;
        config.rcc.apb2_pre = APBPrescaler::DIV2;
        config.rcc.sys = Sysclk::PLL1_P;
        config.rcc.mux.clk48sel = mux::Clk48sel::PLL1_Q;
    }
    let p = embassy_stm32::init(config);

    // Create the driver, from the HAL.
    static ENDPOINT_OUT_BUFFER: StaticCell<[u8; 256]> = StaticCell::new();
    let mut config = embassy_stm32::usb::Config::default();

    // USB devices which are self-powered (i.e., that can stay powered on if unplugged from the host)
    // need to enable vbus_detection to comply with the USB spec. Per section 6.10 of the Nucleo board
    // manual (UM1974), CN13 (the USB port) cannot power the board; external power is necessary.
    // See docs on `vbus_detection` for details.
    config.vbus_detection = true;

    let driver = usb::Driver::new_fs(
        p.USB_OTG_FS,
        Irqs,
        p.PA12,
        p.PA11,
        ENDPOINT_OUT_BUFFER.init([0; 256]),
        config,
    );

    // per https://pid.codes, FOSS projects can apply to be listed under the vendor ID owned by InterBiometrics
    let vendor_id = 0x1209;
    let product_id = 0x5e7a;

    let mut config = embassy_usb::Config::new(vendor_id, product_id);
    config.manufacturer = Some("Pawpaw Works");
    config.product = Some("Synth Transformer");
    config.self_powered = true;
    config.max_power = 0;

    // Create embassy-usb DeviceBuilder using the driver and config.
    // It needs some buffers for building the descriptors.
    static CONFIG_DESCRIPTOR: StaticCell<[u8; 256]> = StaticCell::new();
    static BOS_DESCRIPTOR: StaticCell<[u8; 256]> = StaticCell::new();
    static CONTROL_BUFFER: StaticCell<[u8; 64]> = StaticCell::new();
    static CDC_STATE: StaticCell<cdc_acm::State> = StaticCell::new();

    let mut builder = Builder::new(
        driver,
        config,
        CONFIG_DESCRIPTOR.init([0; 256]),
        BOS_DESCRIPTOR.init([0; 256]),
        &mut [], // no msos descriptors
        CONTROL_BUFFER.init([0; 64]),
    );

    // Create classes on the builder.
    let midi_class = MidiClass::new(&mut builder, 0, 1, MAX_PACKET_SIZE);
    let cdc_class = CdcAcmClass::new(&mut builder, CDC_STATE.init(cdc_acm::State::new()), MAX_PACKET_SIZE);
    let (sender, receiver) = cdc_class.split();

    // Build the builder.
    let usb = builder.build();

    unwrap!(spawner.spawn(usb_task(usb)));
    unwrap!(spawner.spawn(midi_task(midi_class)));
    unwrap!(spawner.spawn(editor_task(receiver)));

    // Arduino header pins D2-D7
    let lcd = Lcd::new(
        Output::new(p.PF13, Level::Low, Speed::Low),
        Output::new(p.PE9, Level::Low, Speed::Low),
        [
            Output::new(p.PE11, Level::Low, Speed::Low),
            Output::new(p.PF14, Level::Low, Speed::Low),
            Output::new(p.PE13, Level::Low, Speed::Low),
            Output::new(p.PF15, Level::Low, Speed::Low),
        ],
    );

    let mut i2c_config = i2c::Config::default();
    i2c_config.frequency = Hertz(400_000);
    let i2c = I2c::new_blocking(p.I2C1, p.PB8, p.PB9, i2c_config);

    let mut uart_config = usart::Config::default();
    uart_config.baudrate = midi::DIN_BAUD_RATE;
    let din = unwrap!(UartTx::new(p.USART2, p.PD5, p.DMA1_CH6, uart_config));

    let device_config = DeviceConfig::default();
    let io = Io {
        storage: Eeprom::new(i2c, eeprom::DEFAULT_ADDRESS),
        transport: EditorLink::new(&EDITOR_INBOX, sender, device_config.max_message_len),
        display: lcd,
        button: PresetButton::new(Input::new(p.PC13, Pull::None)),
        midi_in: UsbMidiIn::new(&MIDI_QUEUE),
        midi_out: DinMidiOut::new(din),
        indicator: StatusLed(Output::new(p.PB14, Level::Low, Speed::Low)),
    };
    unwrap!(spawner.spawn(control_task(io, device_config)));
}

/// Runs the state machine. The only task that touches settings, storage or the display.
#[embassy_executor::task]
async fn control_task(mut io: Io<Nucleo>, config: DeviceConfig) -> ! {
    let mut program = Program::new(config);
    loop {
        let pause = program.tick(&mut io).await;
        Timer::after(pause).await;
    }
}

#[embassy_executor::task]
async fn usb_task(mut usb: UsbDevice<'static, UsbDriver>) -> ! {
    usb.run().await
}

#[embassy_executor::task]
async fn midi_task(mut class: MidiClass<'static, UsbDriver>) -> ! {
    loop {
        class.wait_connection().await;
        info!("USB MIDI connected");
        let _ = midi::receive(&mut class, &MIDI_QUEUE).await;
        info!("USB MIDI disconnected");
    }
}

#[embassy_executor::task]
async fn editor_task(mut receiver: Receiver<'static, UsbDriver>) -> ! {
    loop {
        receiver.wait_connection().await;
        info!("Editor connected");
        editor_link::receive(&mut receiver, &EDITOR_INBOX).await;
        info!("Editor disconnected");
    }
}
