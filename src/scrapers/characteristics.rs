//! Multilingual "label value" scan over the characteristics block of a
//! detail page.

use crate::models::ListingRecord;
use crate::parsers::{clean_text, parse_bool, parse_energy_class, parse_float, parse_int, parse_price};
use anyhow::{Context, Result};
use regex::Regex;
use scraper::{ElementRef, Html, Node};

/// Leaf-ish elements only: more direct child elements than this marks a container
const MAX_CHILD_ELEMENTS: usize = 4;
const MIN_TEXT_LEN: usize = 2;
const MAX_TEXT_LEN: usize = 300;
/// Raw values longer than this are discarded as markup noise
const MAX_VALUE_LEN: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    Price,
    Int,
    Float,
    Bool,
    Energy,
    Text,
}

/// Record field fed by the characteristics block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Characteristic {
    SalePrice,
    Commission,
    Availability,
    RentPrice,
    MonthlyCharges,
    Deposit,
    SurfaceM2,
    Floor,
    Rooms,
    Bedrooms,
    YearOfConstruction,
    FittedKitchen,
    OpenKitchen,
    ShowerRooms,
    Bathrooms,
    SeparateToilets,
    Furnished,
    Balcony,
    BalconyM2,
    TerraceM2,
    Garden,
    ParkingSpaces,
    EnergyClass,
    ThermalInsulationClass,
    GasHeating,
    ElectricHeating,
    HeatPump,
    DistrictHeating,
    PelletHeating,
    OilHeating,
    SolarHeating,
    Basement,
    LaundryRoom,
    Elevator,
    Storage,
    PetsAllowed,
}

/// Label table in match order. English, French and German labels plus the
/// variants immotop prints.
const LABELS: &[(Characteristic, &[&str])] = &[
    (Characteristic::SalePrice, &["Sale price", "Prix de vente", "Kaufpreis"]),
    (Characteristic::Commission, &["Commission paid by", "Commission payée par", "Provision"]),
    (Characteristic::Availability, &["Availability", "Disponibilité", "Verfügbarkeit"]),
    (Characteristic::RentPrice, &["Rent", "Loyer", "Miete"]),
    (Characteristic::MonthlyCharges, &["Monthly charges", "Charges mensuelles", "Nebenkosten"]),
    (Characteristic::Deposit, &["Deposit", "Caution", "Kaution", "Garantie locative"]),
    (Characteristic::SurfaceM2, &["Livable surface", "Surface habitable", "Wohnfläche", "Superficie"]),
    (Characteristic::Floor, &["Property's floor", "Etage du bien", "Stockwerk", "Étage"]),
    (Characteristic::Rooms, &["Number of rooms", "Nombre de pièces", "Zimmeranzahl", "Pièces"]),
    (Characteristic::Bedrooms, &["Number of bedrooms", "Nombre de chambres", "Schlafzimmer", "Chambres à coucher"]),
    (Characteristic::YearOfConstruction, &["Year of construction", "Année de construction", "Baujahr"]),
    (Characteristic::FittedKitchen, &["Fitted kitchen", "Cuisine équipée", "Einbauküche"]),
    (Characteristic::OpenKitchen, &["Open kitchen", "Cuisine ouverte", "Offene Küche"]),
    (Characteristic::ShowerRooms, &["Shower rooms", "Salles de douche", "Duschen"]),
    (Characteristic::Bathrooms, &["Bathrooms", "Salles de bain", "Badezimmer"]),
    (Characteristic::SeparateToilets, &["Separate toilets", "Toilettes séparées", "Separate WC"]),
    (Characteristic::Furnished, &["Furnished", "Meublé", "Möbliert"]),
    (Characteristic::Balcony, &["Balcony", "Balcon", "Balkon"]),
    (Characteristic::BalconyM2, &["Balcony", "Balcon", "Balkon"]),
    (Characteristic::TerraceM2, &["Terrace", "Terrasse"]),
    (Characteristic::Garden, &["Garden", "Jardin", "Garten"]),
    (Characteristic::ParkingSpaces, &["Parking spaces", "Places de parking", "Parkplätze"]),
    (Characteristic::EnergyClass, &["Energy class", "Classe énergétique", "Energieklasse"]),
    (
        Characteristic::ThermalInsulationClass,
        &["Thermal insulation class", "Classe d'isolation thermique", "Wärmedämmklasse"],
    ),
    (Characteristic::GasHeating, &["Gas heating", "Chauffage gaz", "Gasheizung"]),
    (Characteristic::ElectricHeating, &["Electric heating", "Chauffage électrique", "Elektroheizung"]),
    (Characteristic::HeatPump, &["Heat pump", "Pompe à chaleur", "Wärmepumpe"]),
    (Characteristic::DistrictHeating, &["District heating", "Chauffage urbain", "Fernheizung"]),
    (Characteristic::PelletHeating, &["Pellet heating", "Chauffage aux pellets", "Pelletheizung"]),
    (Characteristic::OilHeating, &["Oil heating", "Chauffage mazout", "Ölheizung"]),
    (Characteristic::SolarHeating, &["Solar heating", "Chauffage solaire", "Solarheizung"]),
    (Characteristic::Basement, &["Basement", "Cave", "Keller"]),
    (Characteristic::LaundryRoom, &["Laundry room", "Buanderie", "Waschküche"]),
    (Characteristic::Elevator, &["Elevator", "Ascenseur", "Aufzug"]),
    (Characteristic::Storage, &["Storage", "Local de stockage", "Lagerraum"]),
    (Characteristic::PetsAllowed, &["Pets allowed", "Animaux acceptés", "Haustiere erlaubt"]),
];

impl Characteristic {
    pub fn kind(&self) -> ValueKind {
        use Characteristic::*;
        match self {
            SalePrice | RentPrice | MonthlyCharges | Deposit => ValueKind::Price,
            Commission | Availability => ValueKind::Text,
            SurfaceM2 | BalconyM2 | TerraceM2 => ValueKind::Float,
            Floor | Rooms | Bedrooms | YearOfConstruction | ShowerRooms | Bathrooms
            | SeparateToilets | ParkingSpaces => ValueKind::Int,
            EnergyClass | ThermalInsulationClass => ValueKind::Energy,
            FittedKitchen | OpenKitchen | Furnished | Balcony | Garden | GasHeating
            | ElectricHeating | HeatPump | DistrictHeating | PelletHeating | OilHeating
            | SolarHeating | Basement | LaundryRoom | Elevator | Storage | PetsAllowed => ValueKind::Bool,
        }
    }

    /// Parse `raw` with this field's parser and store the result.
    /// Unparseable values leave the field unset.
    pub fn assign(&self, record: &mut ListingRecord, raw: &str) {
        use Characteristic::*;
        match self {
            SalePrice => record.sale_price = parse_price(raw),
            RentPrice => record.rent_price = parse_price(raw),
            MonthlyCharges => record.monthly_charges = parse_price(raw),
            Deposit => record.deposit = parse_price(raw),
            Commission => record.commission = Some(raw.to_string()),
            Availability => record.availability = Some(raw.to_string()),
            SurfaceM2 => record.surface_m2 = parse_float(raw),
            BalconyM2 => record.balcony_m2 = parse_float(raw),
            TerraceM2 => record.terrace_m2 = parse_float(raw),
            Floor => record.floor = parse_int(raw),
            Rooms => record.rooms = parse_int(raw),
            Bedrooms => record.bedrooms = parse_int(raw),
            YearOfConstruction => record.year_of_construction = parse_int(raw),
            ShowerRooms => record.shower_rooms = parse_int(raw),
            Bathrooms => record.bathrooms = parse_int(raw),
            SeparateToilets => record.separate_toilets = parse_int(raw),
            ParkingSpaces => record.parking_spaces = parse_int(raw),
            EnergyClass => record.energy_class = parse_energy_class(raw),
            ThermalInsulationClass => record.thermal_insulation_class = parse_energy_class(raw),
            FittedKitchen => record.fitted_kitchen = parse_bool(raw),
            OpenKitchen => record.open_kitchen = parse_bool(raw),
            Furnished => record.furnished = parse_bool(raw),
            Balcony => record.balcony = parse_bool(raw),
            Garden => record.garden = parse_bool(raw),
            GasHeating => record.gas_heating = parse_bool(raw),
            ElectricHeating => record.electric_heating = parse_bool(raw),
            HeatPump => record.heat_pump = parse_bool(raw),
            DistrictHeating => record.district_heating = parse_bool(raw),
            PelletHeating => record.pellet_heating = parse_bool(raw),
            OilHeating => record.oil_heating = parse_bool(raw),
            SolarHeating => record.solar_heating = parse_bool(raw),
            Basement => record.basement = parse_bool(raw),
            LaundryRoom => record.laundry_room = parse_bool(raw),
            Elevator => record.elevator = parse_bool(raw),
            Storage => record.storage = parse_bool(raw),
            PetsAllowed => record.pets_allowed = parse_bool(raw),
        }
    }
}

struct LabelPattern {
    /// Label at the very start of the element text
    strict: Regex,
    /// Label anywhere in the element text
    loose: Regex,
}

/// Scanner with every label pattern compiled once.
pub struct CharacteristicScanner {
    fields: Vec<(Characteristic, Vec<LabelPattern>)>,
    section_heading: Regex,
}

/// A candidate element with its visible text
struct Candidate<'a> {
    element: ElementRef<'a>,
    text: String,
}

impl CharacteristicScanner {
    pub fn new() -> Result<Self> {
        let mut fields = Vec::with_capacity(LABELS.len());
        for (field, labels) in LABELS {
            let mut patterns = Vec::with_capacity(labels.len());
            for label in labels.iter() {
                let escaped = regex::escape(label);
                patterns.push(LabelPattern {
                    strict: Regex::new(&format!(r"(?i)^{escaped}\s*:?\s*"))
                        .with_context(|| format!("Invalid label pattern for {label}"))?,
                    loose: Regex::new(&format!(r"(?i){escaped}\s*:?\s*"))
                        .with_context(|| format!("Invalid label pattern for {label}"))?,
                });
            }
            fields.push((*field, patterns));
        }
        let section_heading = Regex::new(r"(?i)caract[eé]ristiques|characteristics|eigenschaften")
            .context("Invalid characteristics heading pattern")?;
        Ok(Self {
            fields,
            section_heading,
        })
    }

    /// Fill every characteristic found on the page into `record`.
    pub fn scan(&self, document: &Html, record: &mut ListingRecord) {
        let candidates = self.candidates(document);
        for (field, patterns) in &self.fields {
            for pattern in patterns {
                let raw = find_value(&candidates, &pattern.strict)
                    .or_else(|| find_value(&candidates, &pattern.loose));
                let Some(raw) = raw else {
                    continue;
                };
                if raw.chars().count() > MAX_VALUE_LEN || raw.contains("window.") || raw.contains('{') {
                    continue;
                }
                field.assign(record, &raw);
                break;
            }
        }
    }

    /// Leaf-ish elements of the characteristics section, or of the whole page
    /// when the section heading is missing.
    fn candidates<'a>(&self, document: &'a Html) -> Vec<Candidate<'a>> {
        let all: Vec<ElementRef<'a>> = document
            .root_element()
            .descendants()
            .filter_map(ElementRef::wrap)
            .collect();

        let heading = all.iter().find(|el| {
            matches!(el.value().name(), "h2" | "h3" | "h4")
                && self.section_heading.is_match(&visible_text(**el))
        });

        let scope: Vec<ElementRef<'a>> = match heading {
            Some(heading) => {
                let end = heading
                    .next_siblings()
                    .filter_map(ElementRef::wrap)
                    .find(|sib| matches!(sib.value().name(), "h2" | "h3"))
                    .map(|sib| sib.id());
                all.iter()
                    .skip_while(|el| el.id() != heading.id())
                    .skip(1)
                    .take_while(|el| Some(el.id()) != end)
                    .copied()
                    .collect()
            }
            None => all,
        };

        scope
            .into_iter()
            .filter(|el| !matches!(el.value().name(), "script" | "style" | "noscript"))
            .filter(|el| el.children().filter_map(ElementRef::wrap).count() <= MAX_CHILD_ELEMENTS)
            .filter_map(|element| {
                let text = visible_text(element);
                let len = text.chars().count();
                (MIN_TEXT_LEN..=MAX_TEXT_LEN)
                    .contains(&len)
                    .then_some(Candidate { element, text })
            })
            .collect()
    }
}

/// Text after the first element matching `label`; falls back to the next
/// sibling element when the label stands alone.
fn find_value(candidates: &[Candidate<'_>], label: &Regex) -> Option<String> {
    candidates.iter().find_map(|candidate| {
        let found = label.find(&candidate.text)?;
        let value = candidate.text[found.end()..].trim().to_string();
        if !value.is_empty() {
            return Some(value);
        }
        candidate
            .element
            .next_siblings()
            .find_map(ElementRef::wrap)
            .map(visible_text)
            .filter(|text| !text.is_empty())
    })
}

/// Whitespace-normalised text of an element, skipping script and style content.
pub fn visible_text(element: ElementRef<'_>) -> String {
    fn collect(element: ElementRef<'_>, out: &mut Vec<String>) {
        for child in element.children() {
            match child.value() {
                Node::Text(text) => out.push(text.to_string()),
                Node::Element(el) if matches!(el.name(), "script" | "style" | "noscript") => {}
                Node::Element(_) => {
                    if let Some(child) = ElementRef::wrap(child) {
                        collect(child, out);
                    }
                }
                _ => {}
            }
        }
    }

    let mut parts = Vec::new();
    collect(element, &mut parts);
    clean_text(&parts.join(" "))
}
