//! The descriptor table.
//!
//! A representative cut of the vendor database, one entry per supported
//! chip. Option words are carried verbatim from the vendor data; see the
//! module docs in [`super`] for the bits the host interprets.

use super::Chip;

const BASE: Chip = Chip {
    name: "",
    protocol_id: 0,
    variant: 0,
    read_buffer_size: 1024,
    write_buffer_size: 1024,
    code_memory_size: 0,
    data_memory_size: 0,
    data_memory2_size: 0,
    chip_id: 0,
    chip_id_bytes_count: 0,
    opts1: 0,
    opts2: 0,
    opts3: 0,
    opts4: 0,
    package_details: 0,
};

pub static CHIPS: &[Chip] = &[
    // NMOS/CMOS EPROMs
    Chip {
        name: "27C64",
        protocol_id: 0x07,
        code_memory_size: 8192,
        opts1: 0x0D12,
        opts2: 0x0828,
        package_details: 0x1C00_0000,
        ..BASE
    },
    Chip {
        name: "27C128",
        protocol_id: 0x07,
        code_memory_size: 16384,
        opts1: 0x0D12,
        opts2: 0x0828,
        package_details: 0x1C00_0000,
        ..BASE
    },
    Chip {
        name: "27C256",
        protocol_id: 0x07,
        code_memory_size: 32768,
        opts1: 0x0D12,
        opts2: 0x0828,
        package_details: 0x1C00_0000,
        ..BASE
    },
    Chip {
        name: "27C512",
        protocol_id: 0x08,
        code_memory_size: 65536,
        opts1: 0x0D12,
        opts2: 0x0868,
        package_details: 0x1C00_0000,
        ..BASE
    },
    Chip {
        name: "27C010",
        protocol_id: 0x08,
        code_memory_size: 131072,
        opts1: 0x0D12,
        opts2: 0x0868,
        package_details: 0x2000_0000,
        ..BASE
    },
    // Parallel EEPROMs
    Chip {
        name: "AT28C16",
        protocol_id: 0x25,
        code_memory_size: 2048,
        read_buffer_size: 256,
        write_buffer_size: 256,
        opts1: 0x0500,
        opts2: 0x2002,
        package_details: 0x1800_0000,
        ..BASE
    },
    Chip {
        name: "AT28C64",
        protocol_id: 0x25,
        code_memory_size: 8192,
        write_buffer_size: 256,
        opts1: 0x0500,
        opts2: 0x2002,
        opts4: 0xC000,
        package_details: 0x1C00_0000,
        ..BASE
    },
    Chip {
        name: "AT28C256",
        protocol_id: 0x25,
        code_memory_size: 32768,
        write_buffer_size: 256,
        opts1: 0x0500,
        opts2: 0x2002,
        opts4: 0xC000,
        package_details: 0x1C00_0000,
        ..BASE
    },
    // Parallel flash
    Chip {
        name: "SST39SF010A",
        protocol_id: 0x35,
        code_memory_size: 131072,
        chip_id: 0xBFB5,
        chip_id_bytes_count: 2,
        opts1: 0x0500,
        opts2: 0x4004,
        package_details: 0x2000_0000,
        ..BASE
    },
    Chip {
        name: "SST39SF020A",
        protocol_id: 0x35,
        code_memory_size: 262144,
        chip_id: 0xBFB6,
        chip_id_bytes_count: 2,
        opts1: 0x0500,
        opts2: 0x4004,
        package_details: 0x2000_0000,
        ..BASE
    },
    Chip {
        name: "W29C020C",
        protocol_id: 0x36,
        code_memory_size: 262144,
        chip_id: 0xDA45,
        chip_id_bytes_count: 2,
        opts1: 0x0500,
        opts2: 0x4080,
        opts4: 0xC000,
        package_details: 0x2000_0000,
        ..BASE
    },
    Chip {
        name: "MX29LV160B@TSOP48",
        protocol_id: 0x37,
        code_memory_size: 2097152,
        chip_id: 0xC22249,
        chip_id_bytes_count: 3,
        opts1: 0x0300,
        opts2: 0x0880,
        opts4: 0x0100_2078,
        package_details: 0x0000_000C,
        ..BASE
    },
    // I2C serial EEPROMs
    Chip {
        name: "24C02",
        protocol_id: 0x05,
        code_memory_size: 256,
        read_buffer_size: 128,
        write_buffer_size: 128,
        opts1: 0x0500,
        package_details: 0x0800_0000,
        ..BASE
    },
    Chip {
        name: "24C08",
        protocol_id: 0x05,
        code_memory_size: 1024,
        read_buffer_size: 128,
        write_buffer_size: 128,
        opts1: 0x0500,
        package_details: 0x0800_0000,
        ..BASE
    },
    Chip {
        name: "24C256",
        protocol_id: 0x05,
        code_memory_size: 32768,
        read_buffer_size: 128,
        write_buffer_size: 128,
        opts1: 0x0500,
        package_details: 0x0800_0000,
        ..BASE
    },
    // Microwire EEPROMs
    Chip {
        name: "93C46",
        protocol_id: 0x3A,
        code_memory_size: 128,
        read_buffer_size: 128,
        write_buffer_size: 128,
        opts1: 0x0500,
        opts4: 0x0100_2000,
        package_details: 0x0800_0000,
        ..BASE
    },
    Chip {
        name: "93C66",
        protocol_id: 0x3A,
        code_memory_size: 512,
        read_buffer_size: 128,
        write_buffer_size: 128,
        opts1: 0x0500,
        opts4: 0x0100_2000,
        package_details: 0x0800_0000,
        ..BASE
    },
    // SPI NOR flash (JEDEC id, type 5 reply)
    Chip {
        name: "W25Q32BV",
        protocol_id: 0x2D,
        code_memory_size: 4194304,
        read_buffer_size: 4096,
        write_buffer_size: 256,
        chip_id: 0xEF4016,
        chip_id_bytes_count: 3,
        opts1: 0x0300,
        opts4: 0xC000,
        package_details: 0x0800_0000,
        ..BASE
    },
    Chip {
        name: "W25Q64BV",
        protocol_id: 0x2D,
        code_memory_size: 8388608,
        read_buffer_size: 4096,
        write_buffer_size: 256,
        chip_id: 0xEF4017,
        chip_id_bytes_count: 3,
        opts1: 0x0300,
        opts4: 0xC000,
        package_details: 0x0800_0000,
        ..BASE
    },
    // MCS-51 microcontrollers
    Chip {
        name: "AT89C51",
        protocol_id: 0x30,
        code_memory_size: 4096,
        write_buffer_size: 64,
        chip_id: 0x1E51,
        chip_id_bytes_count: 2,
        opts1: 0x0C05,
        opts2: 0x2100,
        opts4: 0xC000,
        package_details: 0x2800_0000,
        ..BASE
    },
    Chip {
        name: "AT89S52",
        protocol_id: 0x30,
        variant: 0x01,
        code_memory_size: 8192,
        write_buffer_size: 64,
        chip_id: 0x1E52,
        chip_id_bytes_count: 2,
        opts1: 0x0C05,
        opts2: 0x2100,
        opts4: 0xC000,
        package_details: 0x2800_0000,
        ..BASE
    },
    // AVR, class 1 (fuse layout selected by variant)
    Chip {
        name: "ATTINY12",
        protocol_id: 0x71,
        variant: 0x01,
        code_memory_size: 1024,
        data_memory_size: 64,
        read_buffer_size: 256,
        write_buffer_size: 256,
        chip_id: 0x1E9005,
        chip_id_bytes_count: 3,
        opts1: 0x0C05,
        package_details: 0x0801_0000,
        ..BASE
    },
    Chip {
        name: "ATMEGA8",
        protocol_id: 0x71,
        variant: 0x20,
        code_memory_size: 8192,
        data_memory_size: 512,
        read_buffer_size: 256,
        write_buffer_size: 256,
        chip_id: 0x1E9307,
        chip_id_bytes_count: 3,
        opts1: 0x0C05,
        package_details: 0x1C01_0000,
        ..BASE
    },
    Chip {
        name: "ATMEGA16",
        protocol_id: 0x71,
        variant: 0x22,
        code_memory_size: 16384,
        data_memory_size: 512,
        read_buffer_size: 256,
        write_buffer_size: 256,
        chip_id: 0x1E9403,
        chip_id_bytes_count: 3,
        opts1: 0x0C05,
        package_details: 0x2801_0000,
        ..BASE
    },
    Chip {
        name: "ATMEGA328P",
        protocol_id: 0x71,
        variant: 0x2A,
        code_memory_size: 32768,
        data_memory_size: 1024,
        read_buffer_size: 256,
        write_buffer_size: 256,
        chip_id: 0x1E950F,
        chip_id_bytes_count: 3,
        opts1: 0x0C05,
        package_details: 0x1C01_0000,
        ..BASE
    },
    // AVR, class 2
    Chip {
        name: "ATTINY85",
        protocol_id: 0x73,
        variant: 0x10,
        code_memory_size: 8192,
        data_memory_size: 512,
        read_buffer_size: 256,
        write_buffer_size: 256,
        chip_id: 0x1E930B,
        chip_id_bytes_count: 3,
        opts1: 0x0C05,
        package_details: 0x0801_0000,
        ..BASE
    },
    Chip {
        name: "ATTINY2313",
        protocol_id: 0x73,
        variant: 0x12,
        code_memory_size: 2048,
        data_memory_size: 128,
        read_buffer_size: 256,
        write_buffer_size: 256,
        chip_id: 0x1E910A,
        chip_id_bytes_count: 3,
        opts1: 0x0C05,
        package_details: 0x1401_0000,
        ..BASE
    },
    // PIC midrange
    Chip {
        name: "PIC12F508",
        protocol_id: 0x66,
        code_memory_size: 1024,
        read_buffer_size: 64,
        write_buffer_size: 32,
        chip_id_bytes_count: 2,
        opts1: 0x0D04,
        opts3: 1,
        opts4: 0x0100_2000,
        package_details: 0x0802_0000,
        ..BASE
    },
    Chip {
        name: "PIC16F84A",
        protocol_id: 0x63,
        code_memory_size: 2048,
        data_memory_size: 64,
        read_buffer_size: 64,
        write_buffer_size: 32,
        chip_id: 0x0560,
        chip_id_bytes_count: 2,
        opts1: 0x0D04,
        opts3: 4,
        opts4: 0x0100_2000,
        package_details: 0x1202_0000,
        ..BASE
    },
    Chip {
        name: "PIC16F628A",
        protocol_id: 0x63,
        code_memory_size: 4096,
        data_memory_size: 128,
        read_buffer_size: 128,
        write_buffer_size: 64,
        chip_id: 0x1060,
        chip_id_bytes_count: 2,
        opts1: 0x0D04,
        opts3: 5,
        opts4: 0x0100_2000,
        package_details: 0x1202_0000,
        ..BASE
    },
    Chip {
        name: "PIC16F877A",
        protocol_id: 0x63,
        code_memory_size: 16384,
        data_memory_size: 256,
        read_buffer_size: 256,
        write_buffer_size: 128,
        chip_id: 0x09A0,
        chip_id_bytes_count: 2,
        opts1: 0x0D04,
        opts3: 6,
        opts4: 0x0100_2000,
        package_details: 0x2802_0000,
        ..BASE
    },
    // PIC18: the 0x10063 sentinel selects the two-word fuse layout; the id
    // comes from the Microchip table (chip_id left zero on purpose).
    Chip {
        name: "PIC18F2550",
        protocol_id: 0x10063,
        code_memory_size: 32768,
        data_memory_size: 256,
        read_buffer_size: 1024,
        write_buffer_size: 64,
        chip_id_bytes_count: 2,
        opts1: 0x0D04,
        opts3: 7,
        opts4: 0x0100_2000,
        package_details: 0x1C02_0000,
        ..BASE
    },
    Chip {
        name: "PIC18F4520",
        protocol_id: 0x65,
        code_memory_size: 32768,
        data_memory_size: 256,
        read_buffer_size: 1024,
        write_buffer_size: 64,
        chip_id: 0x10A0,
        chip_id_bytes_count: 2,
        opts1: 0x0D04,
        opts3: 8,
        opts4: 0x0100_2000,
        package_details: 0x2802_0000,
        ..BASE
    },
    // GAL logic devices (JEDEC fuse maps, sizes in bits)
    Chip {
        name: "GAL16V8B",
        protocol_id: super::PLD_PROTOCOL_16V8,
        code_memory_size: 2194,
        read_buffer_size: 64,
        write_buffer_size: 64,
        opts1: 0x0C05,
        opts4: 0x0200_0000,
        package_details: 0x1400_0000,
        ..BASE
    },
    Chip {
        name: "GAL20V8B",
        protocol_id: super::PLD_PROTOCOL_20V8,
        code_memory_size: 2706,
        read_buffer_size: 64,
        write_buffer_size: 64,
        opts1: 0x0C05,
        opts4: 0x0200_0000,
        package_details: 0x1800_0000,
        ..BASE
    },
    Chip {
        name: "GAL22V10B",
        protocol_id: super::PLD_PROTOCOL_22V10,
        code_memory_size: 5892,
        read_buffer_size: 64,
        write_buffer_size: 64,
        opts1: 0x0C05,
        opts4: 0x0200_0000,
        package_details: 0x1800_0000,
        ..BASE
    },
];
