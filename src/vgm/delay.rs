//! VGM wait command generation

use super::commands::opcode;

/// Wait n+1 samples (n = 0-15, command 0x70-0x7F)
const WAIT_N_BASE: u8 = 0x70;

/// Samples covered by the one-byte frame waits
const SAMPLES_60TH: u64 = 735;
const SAMPLES_50TH: u64 = 882;

/// Encode a wait of `duration` samples with the fewest bytes
pub fn generate_delay(mut duration: u64) -> Vec<u8> {
    let mut commands = Vec::new();

    while duration > 0 {
        if (SAMPLES_60TH..=SAMPLES_60TH + 16).contains(&duration)
            || duration == SAMPLES_60TH * 2
            || (65536..=67152).contains(&duration)
        {
            commands.push(opcode::WAIT_60TH);
            duration -= SAMPLES_60TH;
        } else if (SAMPLES_50TH..=SAMPLES_50TH + 16).contains(&duration)
            || duration == SAMPLES_50TH * 2
            || (67153..=67299).contains(&duration)
        {
            commands.push(opcode::WAIT_50TH);
            duration -= SAMPLES_50TH;
        } else if duration <= 16 {
            commands.push(WAIT_N_BASE + (duration as u8) - 1);
            break;
        } else if duration <= 32 {
            commands.push(WAIT_N_BASE + 15);
            duration -= 16;
        } else if duration <= 0xFFFF {
            commands.push(opcode::WAIT_NNNN);
            commands.extend_from_slice(&(duration as u16).to_le_bytes());
            break;
        } else {
            commands.extend_from_slice(&[opcode::WAIT_NNNN, 0xFF, 0xFF]);
            duration -= 0xFFFF;
        }
    }

    commands
}

/// Samples encoded by a wait opcode without operands
pub fn short_wait_samples(op: u8) -> Option<u32> {
    match op {
        opcode::WAIT_60TH => Some(SAMPLES_60TH as u32),
        opcode::WAIT_50TH => Some(SAMPLES_50TH as u32),
        0x70..=0x7F => Some(u32::from(op - WAIT_N_BASE) + 1),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_delay() {
        assert_eq!(generate_delay(5), vec![0x74]);
        assert_eq!(short_wait_samples(0x74), Some(5));
    }

    #[test]
    fn test_tick_at_60hz_is_one_byte() {
        assert_eq!(generate_delay(735), vec![0x62]);
        assert_eq!(generate_delay(1470), vec![0x62, 0x62]);
    }

    #[test]
    fn test_16bit_delay() {
        // One tick at tempo 120 (48 Hz)
        assert_eq!(generate_delay(918), vec![0x61, 0x96, 0x03]);
    }

    #[test]
    fn test_long_delay_splits() {
        let cmds = generate_delay(70000);
        assert_eq!(&cmds[0..3], &[0x61, 0xFF, 0xFF]);
        assert_eq!(&cmds[3..], &[0x61, 0x71, 0x11]);
    }
}
