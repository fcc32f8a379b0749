pub struct PriceBand {
    pub subcategory: &'static str,
    pub min: f64,
    pub max: f64,
    pub step: f64,
}

pub struct NounGroup {
    pub subcategory: &'static str,
    pub nouns: &'static [&'static str],
}

pub struct ThemeData {
    pub name: &'static str,
    pub currency: bool,
    pub nouns: &'static [NounGroup],
    pub verbs: &'static [&'static str],
    pub locations: &'static [&'static str],
    pub prices: &'static [PriceBand],
}

pub static NAMES: &[&str] = &[
    "Amina", "Baraka", "Chloe", "Daniel", "Esther", "Farah", "George", "Halima", "Ivan", "Jabari",
    "Kofi", "Lina", "Musa", "Nia", "Omar", "Priya", "Rosa", "Sami", "Tendai", "Wanjiru", "Yusuf",
    "Zara",
];

pub static THEMES: &[ThemeData] = &[
    ThemeData {
        name: "shopping",
        currency: true,
        nouns: &[
            NounGroup {
                subcategory: "stationery",
                nouns: &["pencil", "eraser", "ruler", "exercise book", "crayon box", "sharpener"],
            },
            NounGroup {
                subcategory: "snacks",
                nouns: &["biscuit packet", "juice box", "chocolate bar", "bag of crisps", "muffin"],
            },
            NounGroup {
                subcategory: "toys",
                nouns: &["ball", "kite", "toy car", "puzzle", "skipping rope"],
            },
        ],
        verbs: &["buys", "picks", "orders", "pays for"],
        locations: &["supermarket", "shop", "kiosk", "bookshop"],
        prices: &[
            PriceBand { subcategory: "stationery", min: 5.0, max: 60.0, step: 0.5 },
            PriceBand { subcategory: "snacks", min: 10.0, max: 80.0, step: 0.5 },
            PriceBand { subcategory: "toys", min: 50.0, max: 500.0, step: 5.0 },
        ],
    },
    ThemeData {
        name: "market",
        currency: true,
        nouns: &[
            NounGroup {
                subcategory: "fruits",
                nouns: &["mango", "orange", "banana", "pawpaw", "pineapple", "avocado", "lemon"],
            },
            NounGroup {
                subcategory: "vegetables",
                nouns: &["tomato", "onion", "cabbage", "carrot", "sukuma bunch", "potato"],
            },
            NounGroup {
                subcategory: "grains",
                nouns: &["bag of rice", "packet of flour", "tin of beans", "bag of maize"],
            },
        ],
        verbs: &["sells", "buys", "packs", "weighs"],
        locations: &["market", "stall", "farmers' market", "roadside stand"],
        prices: &[
            PriceBand { subcategory: "fruits", min: 5.0, max: 50.0, step: 0.5 },
            PriceBand { subcategory: "vegetables", min: 5.0, max: 40.0, step: 0.5 },
            PriceBand { subcategory: "grains", min: 60.0, max: 250.0, step: 5.0 },
        ],
    },
    ThemeData {
        name: "school",
        currency: false,
        nouns: &[
            NounGroup {
                subcategory: "people",
                nouns: &["pupils", "teachers", "prefects", "visitors"],
            },
            NounGroup {
                subcategory: "things",
                nouns: &["desks", "books", "chairs", "charts", "lockers"],
            },
        ],
        verbs: &["arranges", "counts", "shares", "collects"],
        locations: &["classroom", "library", "hall", "playground"],
        prices: &[PriceBand { subcategory: "things", min: 20.0, max: 300.0, step: 5.0 }],
    },
    ThemeData {
        name: "sports",
        currency: false,
        nouns: &[
            NounGroup {
                subcategory: "equipment",
                nouns: &["footballs", "cones", "bibs", "rackets", "medals"],
            },
            NounGroup {
                subcategory: "teams",
                nouns: &["players", "runners", "swimmers", "fans"],
            },
        ],
        verbs: &["scores", "runs", "throws", "wins"],
        locations: &["field", "track", "stadium", "pool"],
        prices: &[PriceBand { subcategory: "equipment", min: 100.0, max: 1500.0, step: 50.0 }],
    },
    ThemeData {
        name: "farm",
        currency: false,
        nouns: &[
            NounGroup {
                subcategory: "animals",
                nouns: &["cows", "goats", "chickens", "sheep", "ducks", "rabbits"],
            },
            NounGroup {
                subcategory: "produce",
                nouns: &["eggs", "litres of milk", "sacks of maize", "crates of tomatoes"],
            },
        ],
        verbs: &["feeds", "harvests", "collects", "plants"],
        locations: &["farm", "shamba", "barn", "orchard"],
        prices: &[PriceBand { subcategory: "produce", min: 10.0, max: 120.0, step: 1.0 }],
    },
    ThemeData {
        name: "kitchen",
        currency: false,
        nouns: &[
            NounGroup {
                subcategory: "ingredients",
                nouns: &["cups of flour", "eggs", "spoons of sugar", "cups of milk"],
            },
            NounGroup {
                subcategory: "dishes",
                nouns: &["chapatis", "cakes", "pancakes", "mandazi"],
            },
        ],
        verbs: &["bakes", "mixes", "cooks", "shares"],
        locations: &["kitchen", "bakery", "canteen"],
        prices: &[PriceBand { subcategory: "dishes", min: 10.0, max: 60.0, step: 0.5 }],
    },
    ThemeData {
        name: "transport",
        currency: true,
        nouns: &[
            NounGroup {
                subcategory: "vehicles",
                nouns: &["bus", "matatu", "train", "bicycle", "boat"],
            },
            NounGroup {
                subcategory: "tickets",
                nouns: &["bus ticket", "train ticket", "ferry ticket"],
            },
        ],
        verbs: &["travels", "rides", "drives", "waits"],
        locations: &["bus stop", "station", "terminal", "harbour"],
        prices: &[
            PriceBand { subcategory: "tickets", min: 30.0, max: 400.0, step: 10.0 },
            PriceBand { subcategory: "vehicles", min: 500.0, max: 5000.0, step: 100.0 },
        ],
    },
];
