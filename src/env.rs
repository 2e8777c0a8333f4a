use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use crate::error::{CoreError, EmulatorError};

pub type LocationId = u8;

// =============================================================================
// Environment Constants
// =============================================================================

pub struct EnvConfig {
    /// Frames the action's button is held down.
    pub hold_frames: u32,
    /// Frames advanced after release before the next snapshot is read.
    pub settle_frames: u32,
}

impl Default for EnvConfig {
    fn default() -> Self {
        Self {
            hold_frames: 8,
            settle_frames: 16,
        }
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum Edition {
    #[default]
    Red,
    Blue,
    Yellow,
}

impl Edition {
    pub fn as_str(self) -> &'static str {
        match self {
            Edition::Red => "red",
            Edition::Blue => "blue",
            Edition::Yellow => "yellow",
        }
    }
}

impl std::fmt::Display for Edition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// RAM Addresses
// =============================================================================

pub mod ram {
    pub const PLAYER_X: u16 = 0xD362;
    pub const PLAYER_Y: u16 = 0xD361;
    pub const MAP_ID: u16 = 0xD35E;
    pub const BADGES: u16 = 0xD356;

    pub const MONEY: [u16; 3] = [0xD347, 0xD348, 0xD349];

    pub const PARTY_COUNT: u16 = 0xD163;
    pub const PARTY_SPECIES: u16 = 0xD164;
    pub const PARTY_DATA: u16 = 0xD16B;
    pub const PARTY_MON_SIZE: u16 = 0x2C;
    pub const PARTY_HP_OFFSET: u16 = 0x01;
    pub const PARTY_LEVEL_OFFSET: u16 = 0x21;
    pub const PARTY_MAX_HP_OFFSET: u16 = 0x22;
    pub const MAX_PARTY: usize = 6;

    pub const OPP_LEVELS: [u16; 6] = [0xD8C5, 0xD8F1, 0xD91D, 0xD949, 0xD975, 0xD9A1];
    pub const BATTLE_TYPE: u16 = 0xD057;

    pub const EVENT_FLAGS_START: u16 = 0xD747;
    pub const EVENT_FLAGS_END: u16 = 0xD87E;
    pub const MUSEUM_TICKET: u16 = 0xD754;
    /// Set once the champion has been beaten.
    pub const CHAMPION_DEFEATED: u16 = 0xD863;
    pub const CHAMPION_DEFEATED_BIT: u8 = 1;

    pub const PLAYTIME_HOURS: [u16; 2] = [0xDA40, 0xDA41];
    pub const PLAYTIME_MINUTES: u16 = 0xDA42;
    pub const PLAYTIME_SECONDS: u16 = 0xDA43;
    pub const PLAYTIME_FRAMES: u16 = 0xDA44;
}

/// Addresses resolved once for an edition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryMap {
    pub player_x: u16,
    pub player_y: u16,
    pub map_id: u16,
    pub badges: u16,
    pub money: [u16; 3],
    pub party_count: u16,
    pub party_species: u16,
    pub party_data: u16,
    pub opp_levels: [u16; 6],
    pub battle_type: u16,
    pub event_flags_start: u16,
    pub event_flags_end: u16,
    pub playtime_hours: [u16; 2],
    pub playtime_minutes: u16,
    pub playtime_seconds: u16,
    pub playtime_frames: u16,
}

impl MemoryMap {
    pub fn for_edition(edition: Edition) -> Self {
        let base = Self {
            player_x: ram::PLAYER_X,
            player_y: ram::PLAYER_Y,
            map_id: ram::MAP_ID,
            badges: ram::BADGES,
            money: ram::MONEY,
            party_count: ram::PARTY_COUNT,
            party_species: ram::PARTY_SPECIES,
            party_data: ram::PARTY_DATA,
            opp_levels: ram::OPP_LEVELS,
            battle_type: ram::BATTLE_TYPE,
            event_flags_start: ram::EVENT_FLAGS_START,
            event_flags_end: ram::EVENT_FLAGS_END,
            playtime_hours: ram::PLAYTIME_HOURS,
            playtime_minutes: ram::PLAYTIME_MINUTES,
            playtime_seconds: ram::PLAYTIME_SECONDS,
            playtime_frames: ram::PLAYTIME_FRAMES,
        };
        match edition {
            Edition::Red | Edition::Blue => base,
            // Yellow's save block sits one byte lower.
            Edition::Yellow => base.shifted(-1),
        }
    }

    fn shifted(self, delta: i32) -> Self {
        let s = |addr: u16| (addr as i32 + delta) as u16;
        Self {
            player_x: s(self.player_x),
            player_y: s(self.player_y),
            map_id: s(self.map_id),
            badges: s(self.badges),
            money: self.money.map(s),
            party_count: s(self.party_count),
            party_species: s(self.party_species),
            party_data: s(self.party_data),
            opp_levels: self.opp_levels.map(s),
            battle_type: self.battle_type,
            event_flags_start: s(self.event_flags_start),
            event_flags_end: s(self.event_flags_end),
            playtime_hours: self.playtime_hours.map(s),
            playtime_minutes: s(self.playtime_minutes),
            playtime_seconds: s(self.playtime_seconds),
            playtime_frames: s(self.playtime_frames),
        }
    }

    pub fn event_flag_len(&self) -> usize {
        (self.event_flags_end - self.event_flags_start) as usize
    }
}

// =============================================================================
// Action Space
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Button {
    Up,
    Down,
    Left,
    Right,
    A,
    B,
    Start,
    Select,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
#[repr(u8)]
pub enum Action {
    Up = 0,
    Down = 1,
    Left = 2,
    Right = 3,
    #[serde(rename = "A")]
    Primary = 4,
    #[serde(rename = "B")]
    Secondary = 5,
}

impl Action {
    pub const COUNT: usize = 6;
    pub const ALL: [Action; Action::COUNT] = [
        Action::Up,
        Action::Down,
        Action::Left,
        Action::Right,
        Action::Primary,
        Action::Secondary,
    ];

    pub fn from_index(i: usize) -> Self {
        Self::ALL[i]
    }

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn name(self) -> &'static str {
        match self {
            Action::Up => "UP",
            Action::Down => "DOWN",
            Action::Left => "LEFT",
            Action::Right => "RIGHT",
            Action::Primary => "A",
            Action::Secondary => "B",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|a| a.name() == name)
    }

    pub fn button(self) -> Button {
        match self {
            Action::Up => Button::Up,
            Action::Down => Button::Down,
            Action::Left => Button::Left,
            Action::Right => Button::Right,
            Action::Primary => Button::A,
            Action::Secondary => Button::B,
        }
    }
}

// =============================================================================
// Emulation Collaborator
// =============================================================================

/// The narrow surface this crate needs from an emulator backend.
pub trait Emulator {
    fn read_byte(&self, addr: u16) -> Result<u8, EmulatorError>;
    fn write_byte(&mut self, addr: u16, value: u8) -> Result<(), EmulatorError>;
    fn advance(&mut self, frames: u32) -> Result<(), EmulatorError>;
    fn press(&mut self, button: Button) -> Result<(), EmulatorError>;
    fn release(&mut self, button: Button) -> Result<(), EmulatorError>;
    fn capture_screen(&mut self) -> Result<Vec<u8>, EmulatorError>;
    fn save_snapshot(&mut self, out: &mut dyn Write) -> Result<(), EmulatorError>;
    fn load_snapshot(&mut self, input: &mut dyn Read) -> Result<(), EmulatorError>;
}

pub const SCREEN_WIDTH: usize = 160;
pub const SCREEN_HEIGHT: usize = 144;

/// Flat 64 KiB memory with no CPU behind it. Used to replay RAM dumps
/// offline and to drive tests.
#[derive(Clone)]
pub struct RamImage {
    memory: Vec<u8>,
    frames: u64,
    held: Vec<Button>,
}

impl Default for RamImage {
    fn default() -> Self {
        Self::new()
    }
}

impl RamImage {
    pub fn new() -> Self {
        Self {
            memory: vec![0; 0x1_0000],
            frames: 0,
            held: Vec::new(),
        }
    }

    pub fn from_dump<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let bytes = std::fs::read(path)
            .with_context(|| format!("Failed to read RAM dump: {}", path.display()))?;
        let mut image = Self::new();
        let n = bytes.len().min(image.memory.len());
        image.memory[..n].copy_from_slice(&bytes[..n]);
        Ok(image)
    }

    pub fn poke(&mut self, addr: u16, value: u8) {
        self.memory[addr as usize] = value;
    }

    pub fn peek(&self, addr: u16) -> u8 {
        self.memory[addr as usize]
    }

    pub fn frame_count(&self) -> u64 {
        self.frames
    }

    pub fn is_held(&self, button: Button) -> bool {
        self.held.contains(&button)
    }
}

impl Emulator for RamImage {
    fn read_byte(&self, addr: u16) -> Result<u8, EmulatorError> {
        Ok(self.peek(addr))
    }

    fn write_byte(&mut self, addr: u16, value: u8) -> Result<(), EmulatorError> {
        self.poke(addr, value);
        Ok(())
    }

    fn advance(&mut self, frames: u32) -> Result<(), EmulatorError> {
        self.frames += frames as u64;
        Ok(())
    }

    fn press(&mut self, button: Button) -> Result<(), EmulatorError> {
        if !self.held.contains(&button) {
            self.held.push(button);
        }
        Ok(())
    }

    fn release(&mut self, button: Button) -> Result<(), EmulatorError> {
        self.held.retain(|b| *b != button);
        Ok(())
    }

    fn capture_screen(&mut self) -> Result<Vec<u8>, EmulatorError> {
        Ok(vec![0; SCREEN_WIDTH * SCREEN_HEIGHT * 4])
    }

    fn save_snapshot(&mut self, out: &mut dyn Write) -> Result<(), EmulatorError> {
        out.write_all(&self.memory)?;
        Ok(())
    }

    fn load_snapshot(&mut self, input: &mut dyn Read) -> Result<(), EmulatorError> {
        let mut buf = Vec::with_capacity(self.memory.len());
        input.read_to_end(&mut buf)?;
        if buf.len() != self.memory.len() {
            return Err(EmulatorError::Crashed(format!(
                "snapshot is {} bytes, expected {}",
                buf.len(),
                self.memory.len()
            )));
        }
        self.memory = buf;
        self.held.clear();
        Ok(())
    }
}

// =============================================================================
// Game State
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BattleType {
    #[default]
    None,
    Wild,
    Trainer,
}

impl BattleType {
    fn from_byte(b: u8) -> Option<Self> {
        match b {
            0x00 | 0xFF => Some(BattleType::None),
            0x01 => Some(BattleType::Wild),
            0x02 => Some(BattleType::Trainer),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PartyMember {
    pub species: u8,
    pub level: u8,
    pub hp: u16,
    pub max_hp: u16,
}

/// One step's view of the game, read from memory and never mutated.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct GameState {
    pub edition: Edition,
    pub location: LocationId,
    pub x: u8,
    pub y: u8,
    pub badges: u8,
    pub party: Vec<PartyMember>,
    pub opponent_levels: Vec<u8>,
    pub event_flags: Vec<u8>,
    pub battle_type: BattleType,
    pub money: u32,
    pub play_time_seconds: f64,
}

impl GameState {
    pub fn badge_count(&self) -> u32 {
        self.badges.count_ones()
    }

    pub fn level_sum(&self) -> u32 {
        self.party.iter().map(|p| p.level as u32).sum()
    }

    pub fn hp_fraction(&self) -> f64 {
        hp_fraction(&self.party)
    }

    pub fn in_battle(&self) -> bool {
        self.battle_type != BattleType::None
    }

    pub fn event_flag(&self, byte: usize, bit: u8) -> bool {
        self.event_flags
            .get(byte)
            .is_some_and(|b| (b >> bit) & 1 == 1)
    }

    /// Species in party order; equal signatures mean an unchanged party.
    pub fn party_signature(&self) -> impl Iterator<Item = u8> + '_ {
        self.party.iter().map(|p| p.species)
    }

    pub fn same_party_as(&self, other: &GameState) -> bool {
        self.party.len() == other.party.len() && self.party_signature().eq(other.party_signature())
    }
}

pub fn count_event_flags(state: &GameState) -> u32 {
    state.event_flags.iter().map(|b| b.count_ones()).sum()
}

/// Party-wide current/max HP. Zero max HP yields 0.
pub fn hp_fraction(party: &[PartyMember]) -> f64 {
    let (hp, max) = party.iter().fold((0u32, 0u32), |(hp, max), p| {
        (hp + p.hp as u32, max + p.max_hp as u32)
    });
    if max == 0 {
        return 0.0;
    }
    (hp as f64 / max as f64).min(1.0)
}

pub fn decode_bcd_money(bytes: [u8; 3]) -> u32 {
    bytes.iter().fold(0u32, |acc, &b| {
        acc * 100 + (b >> 4) as u32 * 10 + (b & 0x0F) as u32
    })
}

pub fn location_name(id: LocationId) -> String {
    let name = match id {
        0x00 => "Pallet Town",
        0x01 => "Viridian City",
        0x02 => "Pewter City",
        0x03 => "Cerulean City",
        0x04 => "Lavender Town",
        0x05 => "Vermilion City",
        0x06 => "Celadon City",
        0x07 => "Fuchsia City",
        0x08 => "Cinnabar Island",
        0x09 => "Indigo Plateau",
        0x0A => "Saffron City",
        0x0B..=0x1F => return format!("Route {}", id - 0x0A),
        0x25..=0x28 => return format!("Route {}", id - 0x25 + 22),
        0x33 => "Red's House 1F",
        0x34 => "Red's House 2F",
        0x35 => "Blue's House",
        0x36 => "Oak's Lab",
        0x40 => "Viridian Gym",
        0x41 => "Pewter Gym",
        0x48 => "Cerulean Gym",
        0x55 => "Vermilion Gym",
        0x59 => "Viridian Forest",
        0x5E => "Celadon Gym",
        0x6C => "Mt. Moon 1F",
        0x6D => "Mt. Moon B1F",
        0x6E => "Mt. Moon B2F",
        0x6F => "Fuchsia Gym",
        0x7F => "Cinnabar Gym",
        0x87 => "Indigo Plateau Lobby",
        0x88 => "Saffron Gym",
        0xA4 => "Rock Tunnel 1F",
        0xA5 => "Rock Tunnel B1F",
        0xAB => "Power Plant",
        0xAC => "Diglett's Cave",
        0xAD => "Victory Road 1F",
        0xAE => "Victory Road 2F",
        0xAF => "Victory Road 3F",
        0xE7..=0xED => return format!("Pokemon Tower {}F", id - 0xE6),
        0xF3..=0xFD => return format!("Silph Co. {}F", id - 0xF2),
        _ => return format!("Unknown Location (0x{id:02X})"),
    };
    name.to_string()
}

fn read_u16_be<E: Emulator + ?Sized>(emu: &E, addr: u16) -> Result<u16, EmulatorError> {
    Ok(((emu.read_byte(addr)? as u16) << 8) | emu.read_byte(addr + 1)? as u16)
}

/// Build a snapshot from memory. Party counts above six and unknown battle
/// bytes are reported as malformed rather than clamped.
pub fn read_state<E: Emulator + ?Sized>(
    emu: &E,
    map: &MemoryMap,
    edition: Edition,
) -> Result<GameState, CoreError> {
    let party_count = emu.read_byte(map.party_count)? as usize;
    if party_count > ram::MAX_PARTY {
        return Err(CoreError::MalformedSnapshot(format!(
            "party count {party_count} exceeds {}",
            ram::MAX_PARTY
        )));
    }
    let mut party = Vec::with_capacity(party_count);
    for i in 0..party_count {
        let base = map.party_data + i as u16 * ram::PARTY_MON_SIZE;
        party.push(PartyMember {
            species: emu.read_byte(map.party_species + i as u16)?,
            level: emu.read_byte(base + ram::PARTY_LEVEL_OFFSET)?,
            hp: read_u16_be(emu, base + ram::PARTY_HP_OFFSET)?,
            max_hp: read_u16_be(emu, base + ram::PARTY_MAX_HP_OFFSET)?,
        });
    }

    let battle_byte = emu.read_byte(map.battle_type)?;
    let battle_type = BattleType::from_byte(battle_byte).ok_or_else(|| {
        CoreError::MalformedSnapshot(format!("unknown battle type 0x{battle_byte:02X}"))
    })?;

    let mut opponent_levels = Vec::new();
    if battle_type != BattleType::None {
        for &addr in &map.opp_levels {
            let level = emu.read_byte(addr)?;
            if level > 0 {
                opponent_levels.push(level);
            }
        }
    }

    let mut event_flags = Vec::with_capacity(map.event_flag_len());
    for addr in map.event_flags_start..map.event_flags_end {
        event_flags.push(emu.read_byte(addr)?);
    }

    let money = decode_bcd_money([
        emu.read_byte(map.money[0])?,
        emu.read_byte(map.money[1])?,
        emu.read_byte(map.money[2])?,
    ]);

    let hours = ((emu.read_byte(map.playtime_hours[0])? as u32) << 8)
        | emu.read_byte(map.playtime_hours[1])? as u32;
    let play_time_seconds = hours as f64 * 3600.0
        + emu.read_byte(map.playtime_minutes)? as f64 * 60.0
        + emu.read_byte(map.playtime_seconds)? as f64
        + emu.read_byte(map.playtime_frames)? as f64 / 60.0;

    Ok(GameState {
        edition,
        location: emu.read_byte(map.map_id)?,
        x: emu.read_byte(map.player_x)?,
        y: emu.read_byte(map.player_y)?,
        badges: emu.read_byte(map.badges)?,
        party,
        opponent_levels,
        event_flags,
        battle_type,
        money,
        play_time_seconds,
    })
}

// =============================================================================
// Game Boy Environment
// =============================================================================

pub struct GbEnv<E: Emulator> {
    emu: E,
    map: MemoryMap,
    edition: Edition,
    steps: u64,
    pub env_config: EnvConfig,
}

impl<E: Emulator> GbEnv<E> {
    pub fn new(emu: E, edition: Edition, env_config: EnvConfig) -> Self {
        Self {
            emu,
            map: MemoryMap::for_edition(edition),
            edition,
            steps: 0,
            env_config,
        }
    }

    pub fn edition(&self) -> Edition {
        self.edition
    }

    pub fn memory_map(&self) -> &MemoryMap {
        &self.map
    }

    pub fn steps(&self) -> u64 {
        self.steps
    }

    pub fn emulator(&self) -> &E {
        &self.emu
    }

    pub fn emulator_mut(&mut self) -> &mut E {
        &mut self.emu
    }

    pub fn read_state(&self) -> Result<GameState, CoreError> {
        read_state(&self.emu, &self.map, self.edition)
    }

    pub fn step(&mut self, action: Action) -> Result<(), EmulatorError> {
        self.steps += 1;
        let button = action.button();
        self.emu.press(button)?;
        self.emu.advance(self.env_config.hold_frames)?;
        self.emu.release(button)?;
        self.emu.advance(self.env_config.settle_frames)?;
        Ok(())
    }

    pub fn capture_screen(&mut self) -> Result<Vec<u8>, EmulatorError> {
        self.emu.capture_screen()
    }

    pub fn reset_from_snapshot(&mut self, path: &Path) -> Result<()> {
        let file = File::open(path)
            .with_context(|| format!("Failed to open snapshot: {}", path.display()))?;
        let mut reader = BufReader::new(file);
        self.emu
            .load_snapshot(&mut reader)
            .map_err(CoreError::from)
            .with_context(|| format!("Failed to load snapshot: {}", path.display()))?;
        Ok(())
    }

    pub fn save_snapshot(&mut self, path: &Path) -> Result<()> {
        let file = File::create(path)
            .with_context(|| format!("Failed to create snapshot: {}", path.display()))?;
        let mut writer = BufWriter::new(file);
        self.emu.save_snapshot(&mut writer).map_err(CoreError::from)?;
        writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_mon(img: &mut RamImage, slot: u16, species: u8, level: u8, hp: u16, max_hp: u16) {
        let base = ram::PARTY_DATA + slot * ram::PARTY_MON_SIZE;
        img.poke(ram::PARTY_SPECIES + slot, species);
        img.poke(base + ram::PARTY_LEVEL_OFFSET, level);
        img.poke(base + ram::PARTY_HP_OFFSET, (hp >> 8) as u8);
        img.poke(base + ram::PARTY_HP_OFFSET + 1, hp as u8);
        img.poke(base + ram::PARTY_MAX_HP_OFFSET, (max_hp >> 8) as u8);
        img.poke(base + ram::PARTY_MAX_HP_OFFSET + 1, max_hp as u8);
    }

    #[test]
    fn reads_party_position_and_money() {
        let mut img = RamImage::new();
        img.poke(ram::PLAYER_X, 5);
        img.poke(ram::PLAYER_Y, 7);
        img.poke(ram::MAP_ID, 0x01);
        img.poke(ram::BADGES, 0b0000_0011);
        img.poke(ram::PARTY_COUNT, 2);
        write_mon(&mut img, 0, 0xB0, 12, 30, 40);
        write_mon(&mut img, 1, 0x24, 5, 300, 300);
        img.poke(ram::MONEY[0], 0x01);
        img.poke(ram::MONEY[1], 0x23);
        img.poke(ram::MONEY[2], 0x45);

        let map = MemoryMap::for_edition(Edition::Red);
        let state = read_state(&img, &map, Edition::Red).unwrap();
        assert_eq!((state.x, state.y, state.location), (5, 7, 0x01));
        assert_eq!(state.badge_count(), 2);
        assert_eq!(state.level_sum(), 17);
        assert_eq!(state.party[1].hp, 300);
        assert_eq!(state.money, 12_345);
        assert_eq!(state.event_flags.len(), map.event_flag_len());
        assert!(state.opponent_levels.is_empty());
    }

    #[test]
    fn oversized_party_is_malformed() {
        let mut img = RamImage::new();
        img.poke(ram::PARTY_COUNT, 7);
        let map = MemoryMap::for_edition(Edition::Red);
        let err = read_state(&img, &map, Edition::Red).unwrap_err();
        assert!(matches!(err, CoreError::MalformedSnapshot(_)));
    }

    #[test]
    fn opponent_levels_only_read_in_battle() {
        let mut img = RamImage::new();
        img.poke(ram::OPP_LEVELS[0], 9);
        let map = MemoryMap::for_edition(Edition::Red);
        assert!(read_state(&img, &map, Edition::Red)
            .unwrap()
            .opponent_levels
            .is_empty());

        img.poke(ram::BATTLE_TYPE, 2);
        let state = read_state(&img, &map, Edition::Red).unwrap();
        assert_eq!(state.battle_type, BattleType::Trainer);
        assert_eq!(state.opponent_levels, vec![9]);
    }

    #[test]
    fn hp_fraction_guards_zero_max() {
        assert_eq!(hp_fraction(&[]), 0.0);
        let fainted = PartyMember {
            species: 1,
            level: 3,
            hp: 0,
            max_hp: 0,
        };
        assert_eq!(hp_fraction(&[fainted]), 0.0);
    }

    #[test]
    fn step_presses_and_releases_the_action_button() {
        let mut env = GbEnv::new(RamImage::new(), Edition::Red, EnvConfig::default());
        env.step(Action::Primary).unwrap();
        assert!(!env.emulator().is_held(Button::A));
        assert_eq!(env.emulator().frame_count(), 24);
        assert_eq!(env.steps(), 1);
    }

    #[test]
    fn action_names_round_trip() {
        for action in Action::ALL {
            assert_eq!(Action::from_name(action.name()), Some(action));
            assert_eq!(Action::from_index(action.index()), action);
        }
        assert_eq!(Action::from_name("START"), None);
    }

    #[test]
    fn yellow_addresses_are_shifted() {
        let red = MemoryMap::for_edition(Edition::Red);
        let yellow = MemoryMap::for_edition(Edition::Yellow);
        assert_eq!(yellow.player_x, red.player_x - 1);
        assert_eq!(yellow.event_flag_len(), red.event_flag_len());
    }

    #[test]
    fn location_names() {
        assert_eq!(location_name(0x00), "Pallet Town");
        assert_eq!(location_name(0x0B), "Route 1");
        assert_eq!(location_name(0x25), "Route 22");
        assert_eq!(location_name(0xE7), "Pokemon Tower 1F");
        assert!(location_name(0xFF).starts_with("Unknown"));
    }
}
